/// Logs a statement as it is sent to the server along with the time the server took.
macro_rules! log_statement {
    ( $line:expr, $conn:expr, $query:expr, $block:expr ) => {{
        let query_string: &str = $query;
        let timer = std::time::Instant::now();
        let result = $block;
        let elapsed = timer.elapsed();
        if elapsed >= std::time::Duration::from_secs(1) {
            log::warn!(
                target: "ecpg",
                "{} ... on line {}, connection \"{}\", elapsed: {:.3?}\n\n    {}\n",
                crate::logging::parse_query_summary(query_string),
                $line,
                $conn,
                elapsed,
                query_string
            );
        } else {
            log::debug!(
                target: "ecpg",
                "{} ... on line {}, connection \"{}\", elapsed: {:.3?}\n\n    {}\n",
                crate::logging::parse_query_summary(query_string),
                $line,
                $conn,
                elapsed,
                query_string
            );
        }
        result
    }};
}

pub(crate) fn parse_query_summary(query: &str) -> String {
    // For now, just take the first 3 words
    query
        .split_whitespace()
        .take(3)
        .collect::<Vec<&str>>()
        .join(" ")
}

#[test]
fn it_summarizes_queries() {
    assert_eq!(
        parse_query_summary("select a,\n   b from t where x = 1"),
        "select a, b"
    );
    assert_eq!(parse_query_summary(""), "");
}
