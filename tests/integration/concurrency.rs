//! Overlapping pipelines keep their output apart

use std::sync::{Arc, Barrier};
use std::thread;

use yaoxiang_playground::util::config::PlaygroundConfig;
use yaoxiang_playground::Runner;

fn chatty_program(tag: &str) -> String {
    format!(
        r#"
        pub fn Main() {{
            for i in 0..200 {{
                println("{tag}", i);
            }}
        }}
        "#
    )
}

fn expected_output(tag: &str) -> String {
    (0..200)
        .map(|i| format!("{} {}", tag, i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn run_overlapping(runner: Arc<Runner>) {
    let tags = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"];
    let barrier = Arc::new(Barrier::new(tags.len()));

    let handles: Vec<_> = tags
        .iter()
        .map(|tag| {
            let runner = Arc::clone(&runner);
            let barrier = Arc::clone(&barrier);
            let tag = tag.to_string();
            thread::spawn(move || {
                barrier.wait();
                let mut outputs = Vec::new();
                for _ in 0..5 {
                    let execution = runner.run_source(&chatty_program(&tag)).unwrap();
                    outputs.push(execution.output);
                }
                (tag, outputs)
            })
        })
        .collect();

    for handle in handles {
        let (tag, outputs) = handle.join().unwrap();
        for output in outputs {
            assert_eq!(output, expected_output(&tag), "output of {} was contaminated", tag);
        }
    }
}

#[test]
fn test_overlapping_calls_do_not_share_output() {
    run_overlapping(Arc::new(Runner::new()));
}

#[test]
fn test_exclusive_mode_serialises_pipelines() {
    let mut config = PlaygroundConfig::default();
    config.dispatch.exclusive = true;
    let runner = Arc::new(Runner::from_config(&config));
    run_overlapping(Arc::clone(&runner));
    assert_eq!(runner.dispatch_count(), 30);
}
