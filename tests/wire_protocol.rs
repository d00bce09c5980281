use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use staygrid::directory::{Collaborators, Directory};
use staygrid::engine::{PolicyConfig, Scheduler};
use staygrid::wire::{self, Backend};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Backend>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("staygrid_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let directory = Arc::new(Directory::open(&dir.join("directory.wal")).unwrap());
    let scheduler = Scheduler::new(
        dir.join("overrides.wal"),
        Collaborators::from_directory(directory.clone()),
        PolicyConfig::default(),
    )
    .unwrap();
    let backend = Arc::new(Backend {
        scheduler: Arc::new(scheduler),
        directory,
        default_days_ahead: 365,
    });

    let served = backend.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let backend = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, backend, "staygrid".to_string(), None).await;
            });
        }
    });

    (addr, backend)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("staygrid")
        .user("staygrid")
        .password("staygrid");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn affected(messages: &[SimpleQueryMessage]) -> u64 {
    messages
        .iter()
        .find_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(*n),
            _ => None,
        })
        .unwrap_or(0)
}

async fn add_unit(client: &tokio_postgres::Client, base_price: i64) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO owners (id, scope, base_price) VALUES ('{id}', 'unit', {base_price})"
        ))
        .await
        .unwrap();
    id
}

async fn add_room(client: &tokio_postgres::Client, unit: Ulid) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO owners (id, scope, parent_id, base_price) VALUES ('{id}', 'sub_unit', '{unit}', 80)"
        ))
        .await
        .unwrap();
    id
}

async fn available(client: &tokio_postgres::Client, owner: Ulid, check_in: &str, check_out: &str) -> bool {
    let result = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE owner_id = '{owner}' AND check_in = '{check_in}' AND check_out = '{check_out}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(result.len(), 1);
    result[0].get("available") == Some("t")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn holiday_quote_over_wire() {
    let (addr, _backend) = start_test_server().await;
    let client = connect(addr).await;
    let unit = add_unit(&client, 100).await;
    let actor = Ulid::new();

    client
        .batch_execute(&format!(
            "INSERT INTO overrides (owner_id, scope, start_date, end_date, is_available, weekend_price, actor_id) \
             VALUES ('{unit}', 'unit', '2024-12-01', '2024-12-31', true, 150, '{actor}')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO special_prices (owner_id, scope, start_date, end_date, weekday_price, actor_id) \
             VALUES ('{unit}', 'unit', '2024-12-24', '2024-12-26', 300, '{actor}')"
        ))
        .await
        .unwrap();

    let nights = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM quote WHERE owner_id = '{unit}' AND check_in = '2024-12-20' AND check_out = '2024-12-30'"
            ))
            .await
            .unwrap(),
    );
    let prices: Vec<&str> = nights.iter().filter_map(|r| r.get("price")).collect();
    assert_eq!(
        prices,
        vec!["150", "150", "100", "100", "300", "300", "300", "150", "150", "100"]
    );

    let total = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM price WHERE owner_id = '{unit}' AND check_in = '2024-12-20' AND check_out = '2024-12-30'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(total[0].get("nights"), Some("10"));
    assert_eq!(total[0].get("total"), Some("1800"));
}

#[tokio::test]
async fn scoped_overlap_is_rejected_with_sqlstate() {
    let (addr, _backend) = start_test_server().await;
    let client = connect(addr).await;
    let unit = add_unit(&client, 100).await;
    let actor = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO owner_scopes (owner_id, scope_id) VALUES ('{unit}', 'north')"
        ))
        .await
        .unwrap();

    let insert = |start: &str, end: &str| {
        format!(
            "INSERT INTO overrides (owner_id, scope, start_date, end_date, is_available, reason, actor_id, scope_id) \
             VALUES ('{unit}', 'unit', '{start}', '{end}', false, 'maintenance', '{actor}', 'north')"
        )
    };
    client.batch_execute(&insert("2024-01-01", "2024-01-10")).await.unwrap();

    let err = client
        .batch_execute(&insert("2024-01-05", "2024-01-15"))
        .await
        .unwrap_err();
    let db = err.as_db_error().expect("server error");
    assert_eq!(db.code().code(), "23P01");

    let listed = rows(
        client
            .simple_query(&format!("SELECT * FROM overrides WHERE owner_id = '{unit}'"))
            .await
            .unwrap(),
    );
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("start_date"), Some("2024-01-01"));
    assert_eq!(listed[0].get("reason"), Some("maintenance"));

    // Outside the actor's scope the owner does not exist.
    let err = client
        .batch_execute(&format!(
            "INSERT INTO overrides (owner_id, scope, start_date, end_date, is_available, actor_id, scope_id) \
             VALUES ('{unit}', 'unit', '2024-03-01', '2024-03-02', false, '{actor}', 'south')"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "P0002");
}

#[tokio::test]
async fn reservations_drive_availability() {
    let (addr, _backend) = start_test_server().await;
    let client = connect(addr).await;
    let unit = add_unit(&client, 100).await;
    let room = add_room(&client, unit).await;
    let booking = Ulid::new();

    assert!(available(&client, unit, "2024-05-01", "2024-05-04").await);

    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, sub_unit_id, check_in, check_out, status) \
             VALUES ('{booking}', '{room}', '2024-05-02', '2024-05-03', 'confirmed')"
        ))
        .await
        .unwrap();
    assert!(!available(&client, unit, "2024-05-01", "2024-05-04").await);
    assert!(!available(&client, room, "2024-05-01", "2024-05-04").await);
    // Checkout day is free again.
    assert!(available(&client, room, "2024-05-03", "2024-05-05").await);

    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, sub_unit_id, check_in, check_out, status) \
             VALUES ('{booking}', '{room}', '2024-05-02', '2024-05-03', 'cancelled')"
        ))
        .await
        .unwrap();
    assert!(available(&client, unit, "2024-05-01", "2024-05-04").await);
}

#[tokio::test]
async fn calendar_and_defaults() {
    let (addr, _backend) = start_test_server().await;
    let client = connect(addr).await;
    let unit = add_unit(&client, 120).await;

    let days = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM calendar WHERE owner_id = '{unit}' AND year = 2024 AND month = 2"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(days.len(), 29);
    assert_eq!(days[0].get("date"), Some("2024-02-01"));
    assert!(days.iter().all(|d| d.get("price") == Some("120")));
    // 2024-02-02 is a Friday.
    assert_eq!(days[1].get("is_weekend"), Some("t"));

    let err = client
        .simple_query(&format!(
            "SELECT * FROM calendar WHERE owner_id = '{unit}' AND year = 2024 AND month = 13"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "22008");

    let seed = format!("INSERT INTO default_availability (owner_id, scope, days_ahead) VALUES ('{unit}', 'unit', 30)");
    assert_eq!(affected(&client.simple_query(&seed).await.unwrap()), 1);
    assert_eq!(affected(&client.simple_query(&seed).await.unwrap()), 0);

    client.batch_execute("CHECKPOINT").await.unwrap();
    let listed = rows(
        client
            .simple_query(&format!("SELECT * FROM overrides WHERE owner_id = '{unit}'"))
            .await
            .unwrap(),
    );
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("is_available"), Some("t"));
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, backend) = start_test_server().await;
    let client = connect(addr).await;
    let unit = add_unit(&client, 100).await;
    let actor = Ulid::new().to_string();
    let unit_id = unit.to_string();

    let written = client
        .execute(
            "INSERT INTO blocks (owner_id, scope, start_date, end_date, reason, actor_id) VALUES \
             ($1, 'unit', $2, $3, 'owner_blocked', $4), ($1, 'unit', $5, $6, 'owner_blocked', $4)",
            &[&unit_id, &"2024-07-01", &"2024-07-03", &actor, &"2024-07-10", &"2024-07-12"],
        )
        .await
        .unwrap();
    assert_eq!(written, 2);

    let overrides = backend.scheduler.list_overrides(unit).await;
    assert_eq!(overrides.len(), 2);
    assert!(overrides.iter().all(|o| !o.is_available));
}
