//! Tests against a running server. Skipped unless `DATABASE_URL` is set.

use std::env;

use pgbridge::params::ParameterList;
use pgbridge::protocol::types::oid;
use pgbridge::sync::Conn;
use pgbridge::xa::{EndFlags, RecoverFlags, StartFlags, XaConnection, XaResource, Xid};
use pgbridge::{Error, TransactionStatus};

fn get_conn() -> Option<Conn> {
    let mut db_url = env::var("DATABASE_URL").ok()?;
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    Some(Conn::new(db_url.as_str()).expect("Failed to connect"))
}

#[test]
fn simple_query_rows() {
    let Some(mut conn) = get_conn() else { return };

    let rows = conn
        .query_rows("SELECT 1 AS a, NULL::text AS b; SELECT 'x' AS c")
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("a"), Some("1"));
    assert_eq!(rows[0].get("b"), None);
    assert_eq!(rows[1].get("c"), Some("x"));

    conn.ping().unwrap();
    conn.close().unwrap();
    assert!(conn.is_closed());
}

#[test]
fn server_error_keeps_connection_usable() {
    let Some(mut conn) = get_conn() else { return };

    let err = conn.query_drop("SELECT * FROM no_such_table_here").unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    assert!(!conn.is_broken());
    assert_eq!(conn.query_rows("SELECT 2").unwrap()[0].get_index(0), Some("2"));
}

#[test]
fn bound_parameters_and_resolved_types() {
    let Some(mut conn) = get_conn() else { return };

    let mut params = ParameterList::new(4);
    params.set_int4(1, 40).unwrap();
    params.set_int8(2, 2).unwrap();
    params.set_text(3, "it's", oid::UNSPECIFIED).unwrap();
    params.set_null(4, oid::UNSPECIFIED).unwrap();

    let rows = conn
        .execute_rows(
            "SELECT $1::int4 + $2::int8 AS sum, $3::text AS s, $4::int4 IS NULL AS n",
            &mut params,
        )
        .unwrap();
    assert_eq!(rows[0].get("sum"), Some("42"));
    assert_eq!(rows[0].get("s"), Some("it's"));
    assert_eq!(rows[0].get("n"), Some("t"));
    assert_eq!(params.type_oid(3).unwrap(), oid::TEXT);
    assert_eq!(params.type_oid(4).unwrap(), oid::INT4);

    let mut unset = ParameterList::new(1);
    assert!(matches!(
        conn.execute("SELECT $1", &mut unset),
        Err(Error::InvalidUsage(_))
    ));
    assert!(!conn.is_broken());
}

#[test]
fn manual_commit_and_rollback() {
    let Some(mut conn) = get_conn() else { return };

    conn.query_drop("CREATE TEMP TABLE ledger (v int)").unwrap();
    assert!(matches!(conn.commit(), Err(Error::InvalidUsage(_))));

    conn.set_autocommit(false).unwrap();
    conn.query_drop("INSERT INTO ledger VALUES (1)").unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);
    conn.rollback().unwrap();

    conn.query_drop("INSERT INTO ledger VALUES (2)").unwrap();
    conn.commit().unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    conn.set_autocommit(true).unwrap();
    let rows = conn.query_rows("SELECT v FROM ledger").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("v"), Some("2"));
}

#[test]
fn prepared_transaction_round_trip() {
    let Some(mut conn) = get_conn() else { return };
    let limit = conn.query_rows("SHOW max_prepared_transactions").unwrap();
    if limit[0].get_index(0) == Some("0") {
        return;
    }

    conn.query_drop("CREATE TABLE IF NOT EXISTS pgbridge_xa (v int)").unwrap();
    conn.query_drop("DELETE FROM pgbridge_xa").unwrap();

    let xid = Xid::new(77, b"live-test".to_vec(), b"b1".to_vec()).unwrap();
    let mut resource = XaResource::new(conn);
    resource.start(&xid, StartFlags::NoFlags).unwrap();
    resource
        .connection()
        .unwrap()
        .execute("INSERT INTO pgbridge_xa VALUES (7)")
        .unwrap();
    resource.end(&xid, EndFlags::Success).unwrap();
    resource.prepare(&xid).unwrap();
    assert!(resource
        .recover(RecoverFlags::StartScan)
        .unwrap()
        .contains(&xid));

    resource.commit(&xid, false).unwrap();
    let mut conn = resource.into_inner();
    assert!(conn.autocommit());
    let rows = conn.query_rows("SELECT v FROM pgbridge_xa").unwrap();
    assert_eq!(rows[0].get("v"), Some("7"));
    conn.query_drop("DROP TABLE pgbridge_xa").unwrap();
}
