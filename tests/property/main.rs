// tests/property/main.rs

use std::time::Duration;

use proptest::prelude::*;
use runwarden::executor::{Executor, ThreadPoolExecutor};
use runwarden::future::{ReturnWhen, wait};
use runwarden::supervisor::LineBuffer;

/// Text made of short lines, with or without a trailing newline.
fn text_strategy() -> impl Strategy<Value = String> {
    (proptest::collection::vec("[a-z ]{0,12}", 0..12), any::<bool>()).prop_map(
        |(lines, trailing)| {
            let mut text = lines.join("\n");
            if trailing && !text.is_empty() {
                text.push('\n');
            }
            text
        },
    )
}

/// Feed `text` in chunks cut at `cuts` and collect every line handed out.
fn segment(text: &str, cuts: &[usize]) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    points.push(0);
    points.push(bytes.len());
    points.sort_unstable();
    points.dedup();

    let mut buffer = LineBuffer::new();
    let mut lines = Vec::new();
    for window in points.windows(2) {
        buffer.push(&bytes[window[0]..window[1]]);
        while let Some(line) = buffer.next_line() {
            lines.push(line);
        }
    }
    lines.extend(buffer.finish());
    lines
}

proptest! {
    #[test]
    fn line_segmentation_ignores_chunk_boundaries(
        text in text_strategy(),
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
    ) {
        let lines = segment(&text, &cuts);

        // Nothing lost, nothing invented.
        prop_assert_eq!(lines.concat(), text.clone());

        // Same result as reading it in one go.
        prop_assert_eq!(&lines, &segment(&text, &[]));

        // Only the last line may lack its terminator.
        for line in lines.iter().rev().skip(1) {
            prop_assert!(line.ends_with('\n'));
        }
        for line in &lines {
            prop_assert!(!line.is_empty());
            prop_assert!(!line.trim_end_matches('\n').contains('\n'));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn thread_pool_completes_every_task(workers in 1usize..5, tasks in 0usize..40) {
        let pool = ThreadPoolExecutor::new(workers).unwrap();
        let futures: Vec<_> = (0..tasks)
            .map(|i| pool.submit_fn(move || Ok(i * 2)).unwrap())
            .collect();

        let outcome = wait(&futures, Some(Duration::from_secs(10)), ReturnWhen::AllCompleted);
        prop_assert_eq!(outcome.done.len(), tasks);
        prop_assert!(outcome.not_done.is_empty());

        for (i, fut) in futures.iter().enumerate() {
            prop_assert_eq!(fut.result(Some(Duration::ZERO)).unwrap(), i * 2);
        }
        pool.shutdown(true);
    }
}
