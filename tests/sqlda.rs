use chrono::NaiveDate;
use ecpg::backend::{FieldDescription, QueryResult};
use ecpg::types::oid;
use ecpg::{Arg, CompatMode, HostArg, HostType, RuntimeOptions, Sqlda, SqldaLayout, Statement, StatementKind, NULL_PTR};
use ecpg_test::{connected, connected_with, Call};
use rust_decimal::Decimal;

fn orders() -> QueryResult {
    QueryResult::tuples(
        vec![
            FieldDescription::new("id", oid::INT8).size(8),
            FieldDescription::new("note", oid::TEXT),
            FieldDescription::new("total", oid::NUMERIC),
            FieldDescription::new("placed", oid::DATE).size(4),
        ],
        vec![
            vec![
                Some("1".into()),
                Some("first".into()),
                Some("19.99".into()),
                Some("2024-03-01".into()),
            ],
            vec![Some("2".into()), None, Some("-0.5".into()), None],
        ],
    )
}

#[test]
fn it_fills_one_sqlda_per_row() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect("select", orders());

    let mut sqldas: Vec<Sqlda> = Vec::new();
    rt.execute(
        &Statement::new(1, "select * from orders"),
        [Arg::EndOfInput, HostArg::sqlda(&mut sqldas).into()],
    )?;

    assert_eq!(sqldas.len(), 2);

    let first = &sqldas[0];
    assert_eq!(first.layout(), SqldaLayout::Native);
    assert_eq!(first.sqld(), 4);
    assert_eq!(&first.as_bytes()[..8], b"SQLDA  \0");

    let names: Vec<_> = first.columns().map(|var| var.name()).collect();
    assert_eq!(names, ["id", "note", "total", "placed"]);

    assert_eq!(first.column(0).and_then(|v| v.as_i64()), Some(1));
    assert_eq!(first.column(1).and_then(|v| v.as_str()), Some("first"));
    assert_eq!(
        first.column(2).and_then(|v| v.as_decimal()),
        Some(Decimal::new(1999, 2))
    );
    assert_eq!(
        first.column(3).and_then(|v| v.as_date()),
        NaiveDate::from_ymd_opt(2024, 3, 1)
    );

    let second = &sqldas[1];
    assert!(second.column(1).is_some_and(|v| v.is_null()));
    assert!(second.column(3).is_some_and(|v| v.is_null()));
    assert_eq!(
        second.column(2).and_then(|v| v.as_decimal()),
        Some(Decimal::new(-5, 1))
    );

    Ok(())
}

#[test]
fn informix_mode_uses_the_compat_layout() -> anyhow::Result<()> {
    let (rt, mock) = connected_with(CompatMode::Informix, RuntimeOptions::new())?;
    mock.expect("select", orders());

    let mut sqldas = Vec::new();
    rt.execute(
        &Statement::new(1, "select * from orders").compat(CompatMode::Informix),
        [Arg::EndOfInput, HostArg::sqlda(&mut sqldas).into()],
    )?;

    let second = &sqldas[1];
    assert_eq!(second.layout(), SqldaLayout::Compat);

    let total = second.column(2).expect("a total column");
    assert_eq!(total.sqltype(), Some(HostType::Decimal));
    assert_eq!(total.as_decimal(), Some(Decimal::new(-5, 1)));

    // NULLs also carry the in-band pattern of their type
    let placed = second.column(3).expect("a placed column");
    assert!(placed.is_null());
    assert_eq!(placed.data(), Some(&i32::MIN.to_ne_bytes()[..]));

    Ok(())
}

#[test]
fn no_rows_leaves_no_sqlda() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect(
        "select",
        QueryResult::tuples(vec![FieldDescription::new("a", oid::INT4)], Vec::new()),
    );

    let mut sqldas = Vec::new();
    let err = rt
        .execute(
            &Statement::new(1, "select a from t"),
            [Arg::EndOfInput, HostArg::sqlda(&mut sqldas).into()],
        )
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(sqldas.is_empty());

    Ok(())
}

#[test]
fn describe_fills_metadata_only() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    rt.prepare(1, None, false, "s", "select * from orders")?;

    mock.expect("describe s", orders());

    let mut sqldas = Vec::new();
    rt.describe(2, CompatMode::Pgsql, false, None, "s", HostArg::sqlda(&mut sqldas))?;

    let sqlda = &sqldas[0];
    assert_eq!(sqlda.sqld(), 4);

    let id = sqlda.column(0).expect("an id column");
    assert_eq!(id.sqltype(), Some(HostType::LongLong));
    assert_eq!(id.sqllen(), 8);
    assert!(id.data().is_none());

    let err = rt
        .describe(3, CompatMode::Pgsql, false, None, "missing", HostArg::sqlda(&mut sqldas))
        .unwrap_err();
    assert_eq!(err.sqlstate(), "26000");

    Ok(())
}

#[test]
fn sqldas_supply_statement_inputs() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect("select", orders());

    let mut sqldas = Vec::new();
    rt.execute(
        &Statement::new(1, "select * from orders"),
        [Arg::EndOfInput, HostArg::sqlda(&mut sqldas).into()],
    )?;

    // the second row, NULLs included, goes back out as parameters
    let mut row = vec![sqldas.remove(1)];

    rt.prepare(2, None, true, "ins", "insert into archive values (?, ?, ?, ?)")?;
    rt.execute(
        &Statement::new(3, "ins").kind(StatementKind::Execute),
        [HostArg::sqlda(&mut row).into()],
    )?;

    assert!(mock.calls().contains(&Call::ExecPrepared {
        name: "ins".into(),
        params: vec![Some("2".into()), None, Some("-0.5".into()), None],
    }));

    Ok(())
}

#[test]
fn pointer_slots_use_block_offsets() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect("select", orders());

    let mut sqldas = Vec::new();
    rt.execute(
        &Statement::new(1, "select * from orders"),
        [Arg::EndOfInput, HostArg::sqlda(&mut sqldas).into()],
    )?;

    let bytes = sqldas[0].as_bytes();

    // desc_next of the native header
    let next = u64::from_ne_bytes(bytes[24..32].try_into()?);
    assert_eq!(next, NULL_PTR);

    Ok(())
}
