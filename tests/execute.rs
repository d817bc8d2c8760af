use ecpg::backend::{FieldDescription, QueryResult};
use ecpg::codec::{numeric, Interval};
use ecpg::error::code;
use ecpg::types::oid;
use ecpg::{
    sqlca, Arg, AutoBuffer, CompatMode, Error, HostArg, HostType, Runtime, Statement,
    StatementKind, Storage,
};
use ecpg_test::{connected, cstr, setup_if_needed, Call, MockBackend};
use rust_decimal::Decimal;

fn column(name: &str, type_oid: u32, values: &[Option<&str>]) -> QueryResult {
    QueryResult::tuples(
        vec![FieldDescription::new(name, type_oid)],
        values.iter().map(|v| vec![v.map(str::to_owned)]).collect(),
    )
}

#[test]
fn it_opens_a_transaction_for_the_first_statement() -> anyhow::Result<()> {
    setup_if_needed();

    let mock = MockBackend::new();
    let rt = Runtime::new(mock.clone());
    rt.connect(1, CompatMode::Pgsql, None, None)?;
    assert_eq!(rt.current_connection().as_deref(), Some("DEFAULT"));

    mock.expect("insert", QueryResult::command("INSERT 0 1"));
    rt.execute(
        &Statement::new(2, "INSERT INTO t VALUES (?)"),
        [HostArg::int(42).into()],
    )?;

    assert_eq!(
        mock.statements(),
        ["begin transaction", "INSERT INTO t VALUES (42)"]
    );
    assert_eq!(sqlca::get().rows(), 1);
    assert_eq!(sqlca::get().sqlcode, 0);

    // still inside the transaction: a second statement does not begin another
    rt.execute(&Statement::new(3, "INSERT INTO t VALUES (43)"), [])?;
    assert_eq!(mock.statements().len(), 3);

    Ok(())
}

#[test]
fn placeholders_must_match_inputs() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    let query = "insert into t values (?, ?, '?')";

    rt.execute(
        &Statement::new(1, query),
        [HostArg::int(1).into(), HostArg::string("it's").into()],
    )?;
    assert_eq!(
        mock.statements().last().map(String::as_str),
        Some("insert into t values (1, 'it''s', '?')")
    );

    let err = rt
        .execute(
            &Statement::new(2, query),
            [HostArg::int(1).into(), HostArg::int(2).into(), HostArg::int(3).into()],
        )
        .unwrap_err();
    assert!(matches!(err, Error::TooManyArguments { line: 2 }));
    assert_eq!(sqlca::get().sqlcode, code::TOO_MANY_ARGUMENTS);

    let err = rt
        .execute(&Statement::new(3, query), [HostArg::int(1).into()])
        .unwrap_err();
    assert!(matches!(err, Error::TooFewArguments { line: 3 }));

    Ok(())
}

#[test]
fn null_inputs_follow_their_indicator() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;

    let ind = (-1i16).to_ne_bytes();
    rt.execute(
        &Statement::new(1, "insert into t values (?)"),
        [HostArg::int(5)
            .indicator(HostType::Short, Storage::In(ind[..].into()))
            .into()],
    )?;

    assert_eq!(
        mock.statements().last().map(String::as_str),
        Some("insert into t values (null)")
    );

    Ok(())
}

#[test]
fn strings_use_the_backend_escape_when_offered() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.escape_literals();

    rt.execute(
        &Statement::new(1, "insert into t values (?)"),
        [HostArg::string("it's").into()],
    )?;

    assert_eq!(
        mock.statements().last().map(String::as_str),
        Some("insert into t values ($$it's$$)")
    );

    Ok(())
}

#[test]
fn null_outputs_need_an_indicator() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;

    // with an indicator the cell is left alone
    mock.expect("select", column("a", oid::INT4, &[None]));
    let mut out = 7i32.to_ne_bytes();
    let mut ind = [0u8; 2];
    rt.execute(
        &Statement::new(1, "select a from t"),
        [
            Arg::EndOfInput,
            HostArg::output(HostType::Int, &mut out)
                .indicator(HostType::Short, Storage::Out(&mut ind))
                .into(),
        ],
    )?;
    assert_eq!(i16::from_ne_bytes(ind), -1);
    assert_eq!(i32::from_ne_bytes(out), 7);

    // without one the statement fails
    mock.expect("select", column("a", oid::INT4, &[None]));
    let err = rt
        .execute(
            &Statement::new(2, "select a from t"),
            [Arg::EndOfInput, HostArg::output(HostType::Int, &mut out).into()],
        )
        .unwrap_err();
    assert!(matches!(err, Error::MissingIndicator { line: 2 }));
    assert_eq!(sqlca::get().sqlstate(), "22002");

    // unless indicators are optional, then the NULL pattern is written
    mock.expect("select", column("a", oid::INT4, &[None]));
    rt.execute(
        &Statement::new(3, "select a from t").force_indicator(false),
        [Arg::EndOfInput, HostArg::output(HostType::Int, &mut out).into()],
    )?;
    assert_eq!(i32::from_ne_bytes(out), i32::MIN);

    Ok(())
}

#[test]
fn long_strings_are_truncated() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect("select", column("s", oid::TEXT, &[Some("hello world")]));

    let mut out = [b'.'; 8];
    let mut ind = [0u8; 2];
    rt.execute(
        &Statement::new(1, "select s from t"),
        [
            Arg::EndOfInput,
            HostArg::output(HostType::Char, &mut out[..5])
                .varcharsize(5)
                .offset(5)
                .indicator(HostType::Short, Storage::Out(&mut ind))
                .into(),
        ],
    )?;

    assert_eq!(&out, b"hello...");
    assert_eq!(i16::from_ne_bytes(ind), 11);

    let ca = sqlca::get();
    assert!(ca.is_truncated());
    assert_eq!(ca.sqlwarn[0], b'W');
    assert_eq!(ca.sqlcode, 0);

    Ok(())
}

#[test]
fn too_many_rows_for_the_array() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect(
        "select",
        column("a", oid::INT4, &[Some("1"), Some("2"), Some("3")]),
    );

    let mut out = [0u8; 8];
    let err = rt
        .execute(
            &Statement::new(1, "select a from t"),
            [
                Arg::EndOfInput,
                HostArg::output(HostType::Int, &mut out).arrsize(2).into(),
            ],
        )
        .unwrap_err();

    assert!(matches!(err, Error::TooManyMatches { line: 1 }));
    assert_eq!(out, [0; 8]);
    assert_eq!(sqlca::get().sqlstate(), "21000");

    Ok(())
}

#[test]
fn no_rows_is_not_found() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect("select", column("a", oid::INT4, &[]));

    let mut out = [0u8; 4];
    let err = rt
        .execute(
            &Statement::new(1, "select a from t where false"),
            [Arg::EndOfInput, HostArg::output(HostType::Int, &mut out).into()],
        )
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(sqlca::get().sqlstate(), "02000");

    Ok(())
}

#[test]
fn auto_buffers_fit_the_result() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect(
        "select",
        column("s", oid::TEXT, &[Some("a"), Some("longest"), Some("mid")]),
    );

    let mut strings: Option<AutoBuffer> = None;
    rt.execute(
        &Statement::new(1, "select s from t"),
        [
            Arg::EndOfInput,
            HostArg::auto(HostType::Char, &mut strings).into(),
        ],
    )?;

    let strings = strings.expect("a buffer");
    let bytes = strings.bytes();
    assert_eq!(bytes.len(), 3 * 8);
    assert_eq!(cstr(&bytes[0..8]), "a");
    assert_eq!(cstr(&bytes[8..16]), "longest");
    assert_eq!(cstr(&bytes[16..24]), "mid");

    Ok(())
}

#[test]
fn failures_release_auto_buffers() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    mock.expect(
        "select",
        QueryResult::tuples(
            vec![
                FieldDescription::new("s", oid::TEXT),
                FieldDescription::new("n", oid::INT4),
            ],
            vec![vec![Some("x".into()), Some("not a number".into())]],
        ),
    );

    let mut s: Option<AutoBuffer> = None;
    let mut n = [0u8; 4];
    let err = rt
        .execute(
            &Statement::new(1, "select s, n from t"),
            [
                Arg::EndOfInput,
                HostArg::auto(HostType::Char, &mut s).into(),
                HostArg::output(HostType::Int, &mut n).into(),
            ],
        )
        .unwrap_err();

    assert!(matches!(err, Error::IntFormat { line: 1, .. }));
    assert!(s.expect("a buffer").is_released());

    Ok(())
}

#[test]
fn auto_prepared_statements_bind_parameters() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;

    let stmt = Statement::new(1, "select a from t where b = ?")
        .kind(ecpg::StatementKind::AutoPrepare)
        .questionmarks(true);

    for _ in 0..2 {
        mock.expect("execute ecpg1", column("a", oid::INT4, &[Some("3")]));

        let mut out = [0u8; 4];
        rt.execute(
            &stmt,
            [
                HostArg::int(5).into(),
                Arg::EndOfInput,
                HostArg::output(HostType::Int, &mut out).into(),
            ],
        )?;
        assert_eq!(i32::from_ne_bytes(out), 3);
    }

    assert_eq!(
        rt.prepared_statement(None, "ecpg1").as_deref(),
        Some("select a from t where b = $1")
    );

    // prepared once, executed twice
    let prepares = mock
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ecpg_test::Call::Prepare { .. }))
        .count();
    assert_eq!(prepares, 1);

    Ok(())
}

#[test]
fn named_connections_are_addressed_directly() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    rt.connect(1, CompatMode::Pgsql, Some("other"), None)?;
    rt.set_connection(2, "db")?;
    mock.clear_calls();

    rt.execute(&Statement::new(3, "set datestyle to iso").connection("other"), [])?;
    assert_eq!(rt.current_connection().as_deref(), Some("db"));

    let err = rt
        .execute(&Statement::new(4, "set datestyle to iso").connection("nowhere"), [])
        .unwrap_err();
    assert!(matches!(err, Error::NoConnection { line: 4, .. }));

    Ok(())
}

#[test]
fn server_notices_become_warnings() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;

    mock.notice("25001", "there is already a transaction in progress");
    let ca = sqlca::get();

    assert_eq!(ca.sqlcode, code::WARNING_IN_TRANSACTION);
    assert_eq!(ca.sqlwarn[2], b'W');

    // the next statement starts from a clean diagnostic area
    rt.execute(&Statement::new(1, "set datestyle to iso"), [])?;
    assert_eq!(sqlca::get().sqlwarn[2], 0);

    Ok(())
}

/// Sends `cell` as a bound parameter, then decodes the text the server received into a fresh
/// cell of the same type.
fn bounce(
    rt: &Runtime,
    mock: &MockBackend,
    ty: HostType,
    type_oid: u32,
    cell: &[u8],
    varcharsize: i64,
) -> anyhow::Result<(String, Vec<u8>)> {
    rt.execute(
        &Statement::new(1, "ins").kind(StatementKind::Execute),
        [HostArg::input(ty, cell.to_vec()).varcharsize(varcharsize).into()],
    )?;

    let text = match mock.calls().last() {
        Some(Call::ExecPrepared { params, .. }) => params[0].clone(),
        other => anyhow::bail!("expected a prepared execution, got {other:?}"),
    };
    let text = text.ok_or_else(|| anyhow::anyhow!("{ty:?} was sent as NULL"))?;

    mock.expect("select", column("v", type_oid, &[Some(text.as_str())]));
    let mut out = vec![0u8; cell.len()];
    rt.execute(
        &Statement::new(2, "select v from t"),
        [
            Arg::EndOfInput,
            HostArg::output(ty, &mut out).varcharsize(varcharsize).into(),
        ],
    )?;

    Ok((text, out))
}

#[test]
fn values_survive_the_round_trip() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    rt.prepare(1, None, false, "ins", "insert into t values ($1)")?;

    let mut varchar = vec![0u8; 4 + 16];
    varchar[..4].copy_from_slice(&6i32.to_ne_bytes());
    varchar[4..10].copy_from_slice(b"a b'\\c");

    let interval = |time: i64, month: i32| Interval { time, month }.to_cell().to_vec();

    let cases: Vec<(HostType, u32, Vec<u8>, i64)> = vec![
        (HostType::Short, oid::INT2, i16::MIN.to_ne_bytes().to_vec(), 1),
        (HostType::Int, oid::INT4, i32::MIN.to_ne_bytes().to_vec(), 1),
        (HostType::Long, oid::INT8, i64::MAX.to_ne_bytes().to_vec(), 1),
        (HostType::UnsignedLongLong, oid::NUMERIC, u64::MAX.to_ne_bytes().to_vec(), 1),
        (HostType::Float, oid::FLOAT4, 1.1f32.to_ne_bytes().to_vec(), 1),
        (HostType::Double, oid::FLOAT8, (-2.5e-7f64).to_ne_bytes().to_vec(), 1),
        (HostType::Double, oid::FLOAT8, 12345.678901234f64.to_ne_bytes().to_vec(), 1),
        (HostType::Bool, oid::BOOL, vec![1], 1),
        (HostType::Bool, oid::BOOL, vec![0], 1),
        (HostType::Numeric, oid::NUMERIC, numeric::to_cell(&Decimal::new(-12500, 3)).to_vec(), 1),
        (HostType::Date, oid::DATE, (-800i32).to_ne_bytes().to_vec(), 1),
        (HostType::Date, oid::DATE, 9000i32.to_ne_bytes().to_vec(), 1),
        (
            HostType::Timestamp,
            oid::TIMESTAMP,
            (-31_536_000_000_000i64 - 1_234_567).to_ne_bytes().to_vec(),
            1,
        ),
        (HostType::Interval, oid::INTERVAL, interval(-(86_400_000_000 + 3_600_000_000 + 1), -13), 1),
        (HostType::Interval, oid::INTERVAL, interval(-86_400_000_000 - 7_200_000_000, 0), 1),
        (HostType::Interval, oid::INTERVAL, interval(90_061_000_001, 14), 1),
        (HostType::Char, oid::TEXT, b"o'neil\0\0".to_vec(), 8),
        (HostType::Varchar, oid::VARCHAR, varchar, 16),
    ];

    for (ty, type_oid, cell, varcharsize) in cases {
        let (text, out) = bounce(&rt, &mock, ty, type_oid, &cell, varcharsize)?;
        assert_eq!(out, cell, "{ty:?} sent as {text:?}");
    }

    Ok(())
}

#[test]
fn negative_intervals_are_plural() -> anyhow::Result<()> {
    let (rt, mock) = connected()?;
    rt.prepare(1, None, false, "ins", "insert into t values ($1)")?;

    let cell = Interval {
        time: -86_400_000_000 - 7_200_000_000,
        month: 0,
    }
    .to_cell();
    let (text, _) = bounce(&rt, &mock, HostType::Interval, oid::INTERVAL, &cell, 1)?;

    assert_eq!(text, "-1 days -02:00:00");

    Ok(())
}
