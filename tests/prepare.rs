use ecpg::backend::{FieldDescription, QueryResult};
use ecpg::types::oid;
use ecpg::{Arg, CompatMode, Error, HostArg, HostType, RuntimeOptions, Statement, StatementKind};
use ecpg_test::{connected, connected_with, Call};

#[test]
fn it_prepares_host_variable_references() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;

    rt.prepare(1, None, false, "s", "SELECT a FROM t WHERE b = :x")?;
    assert_eq!(
        rt.prepared_statement(None, "s").as_deref(),
        Some("SELECT a FROM t WHERE b = $1")
    );

    mock.expect(
        "execute s",
        QueryResult::tuples(
            vec![FieldDescription::new("a", oid::INT4)],
            vec![vec![Some("10".into())]],
        ),
    );

    let mut a = [0u8; 4];
    rt.execute(
        &Statement::new(2, "s").kind(StatementKind::Execute),
        [
            HostArg::int(5).into(),
            Arg::EndOfInput,
            HostArg::output(HostType::Int, &mut a).into(),
        ],
    )?;

    assert_eq!(i32::from_ne_bytes(a), 10);
    assert!(mock.calls().contains(&Call::Prepare {
        name: "s".into(),
        sql: "SELECT a FROM t WHERE b = $1".into(),
        nparams: 1,
    }));
    assert!(mock.calls().contains(&Call::ExecPrepared {
        name: "s".into(),
        params: vec![Some("5".into())],
    }));

    Ok(())
}

#[test]
fn question_marks_are_markers_when_asked() -> anyhow::Result<()> {
    let (rt, _mock) = connected()?;

    rt.prepare(1, None, true, "q", "update t set a = ? where b = ? and c = '?'")?;
    assert_eq!(
        rt.prepared_statement(None, "q").as_deref(),
        Some("update t set a = $1 where b = $2 and c = '?'")
    );

    rt.prepare(2, None, false, "p", "select a::text from t where b = ?")?;
    assert_eq!(
        rt.prepared_statement(None, "p").as_deref(),
        Some("select a::text from t where b = ?")
    );

    Ok(())
}

#[test]
fn prepared_statements_belong_to_their_connection() -> anyhow::Result<()> {
    let (rt, _mock) = connected()?;
    rt.connect(1, CompatMode::Pgsql, Some("other"), None)?;

    rt.prepare(2, Some("db"), false, "s", "select 1")?;

    assert!(rt.prepared_statement(Some("db"), "s").is_some());
    assert!(rt.prepared_statement(Some("other"), "s").is_none());

    let err = rt
        .execute(&Statement::new(3, "s").kind(StatementKind::Execute), [])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStatement { line: 3, .. }));

    Ok(())
}

#[test]
fn deallocate_all_empties_the_connection() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;

    rt.prepare(1, None, false, "a", "select 1")?;
    rt.prepare(2, None, false, "b", "select 2")?;
    rt.deallocate_all(3, CompatMode::Pgsql, None)?;

    assert!(rt.prepared_statement(None, "a").is_none());
    assert!(rt.prepared_statement(None, "b").is_none());
    assert_eq!(
        mock.statements(),
        ["deallocate \"a\"", "deallocate \"b\""]
    );

    Ok(())
}

#[test]
fn full_buckets_evict_the_least_executed() -> anyhow::Result<()> {
    let (rt, mock) = connected_with(
        CompatMode::Pgsql,
        RuntimeOptions::new()
            .stmt_cache_buckets(1)
            .stmt_cache_entries_per_bucket(2),
    )?;

    let run = |line, query: &str| {
        rt.execute(
            &Statement::new(line, query).kind(StatementKind::AutoPrepare),
            [],
        )
    };

    // ecpg1 runs three times, ecpg2 once
    for line in 1..=3 {
        run(line, "insert into a values (1)")?;
    }
    run(4, "insert into b values (1)")?;

    mock.clear_calls();
    run(5, "insert into c values (1)")?;

    let calls = mock.calls();
    assert!(calls.contains(&Call::Exec("deallocate \"ecpg2\"".into())));
    assert!(!calls.contains(&Call::Exec("deallocate \"ecpg1\"".into())));

    assert!(rt.prepared_statement(None, "ecpg1").is_some());
    assert!(rt.prepared_statement(None, "ecpg2").is_none());
    assert_eq!(
        rt.prepared_statement(None, "ecpg3").as_deref(),
        Some("insert into c values (1)")
    );

    Ok(())
}

#[test]
fn cursors_run_on_the_connection_that_opened_them() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;

    rt.open_cursor(&Statement::new(1, "declare c cursor for select a from t"), "c", [])?;

    rt.connect(2, CompatMode::Pgsql, Some("other"), None)?;
    rt.connect(3, CompatMode::Pgsql, Some("third"), None)?;
    rt.disconnect(4, Some("other"))?;

    mock.expect(
        "fetch",
        QueryResult::tuples(
            vec![FieldDescription::new("a", oid::INT4)],
            vec![vec![Some("1".into())]],
        ),
    );

    let mut a = [0u8; 4];
    rt.fetch_cursor(
        &Statement::new(5, "fetch c"),
        "c",
        [Arg::EndOfInput, HostArg::output(HostType::Int, &mut a).into()],
    )?;
    assert_eq!(i32::from_ne_bytes(a), 1);

    rt.close_cursor(&Statement::new(6, "close c"), "c", [])?;

    let err = rt
        .close_cursor(&Statement::new(7, "close c"), "c", [])
        .unwrap_err();
    assert!(matches!(err, Error::UnknownCursor { line: 7, .. }));
    assert_eq!(err.sqlstate(), "34000");

    Ok(())
}
