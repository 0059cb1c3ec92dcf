//! A two-stage pipeline: parse text lines into integers, then sum them.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use pipeline::{Connectable, ConsumerSink, StageError, TerminalStage, TransformStage};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let total = Arc::new(AtomicI64::new(0));
    let sink_total = total.clone();
    let sum = TerminalStage::new(2, move |value: i64| -> Result<(), StageError> {
        sink_total.fetch_add(value, Ordering::SeqCst);
        Ok(())
    });

    let parse = TransformStage::with_error_handler(
        1,
        |line: String| -> Result<i64, StageError> {
            line.trim()
                .parse::<i64>()
                .map_err(|e| anyhow::anyhow!("bad input {line:?}: {e}"))
        },
        |stage_id, error| {
            eprintln!("stage {stage_id} dropped an item: {error}");
        },
    );
    parse.connect(sum.clone());

    parse.activate();
    sum.activate();

    for line in ["1", "2", "not a number", "3", "4"] {
        parse.add_input(line.to_string());
    }

    parse.flush_all().await;

    println!("sum of valid lines: {}", total.load(Ordering::SeqCst));
}
