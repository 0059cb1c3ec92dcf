//! One transform stage feeding two independent terminal consumers: a
//! running total and a console logger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pipeline::{Connectable, ConsumerSink, StageError, TerminalStage, TransformStage};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let square = TransformStage::new(1, |value: u64| -> Result<u64, StageError> { Ok(value * value) });

    let total = Arc::new(AtomicU64::new(0));
    let sink_total = total.clone();
    let accumulate = TerminalStage::new(2, move |value: u64| -> Result<(), StageError> {
        sink_total.fetch_add(value, Ordering::SeqCst);
        Ok(())
    });

    let log = TerminalStage::new(3, |value: u64| -> Result<(), StageError> {
        println!("squared: {value}");
        Ok(())
    });

    square.connect(accumulate.clone());
    square.connect(log.clone());

    square.activate();
    accumulate.activate();
    log.activate();

    for i in 1..=5u64 {
        square.add_input(i);
    }

    square.flush_all().await;

    println!("sum of squares: {}", total.load(Ordering::SeqCst));
}
