//! Correlation under concurrent use of one shared compiler handle.

use std::thread;

use rstest::rstest;

use tinct_host::{CompileRequest, Compiler};

fn spawn_stub() -> Compiler {
    let config = tinct_e2e::stub_config(env!("CARGO_BIN_EXE_tinct-stubc"));
    Compiler::spawn(&config).expect("failed to spawn stub compiler")
}

#[rstest]
fn ten_threads_each_observe_only_their_own_literal() {
    let compiler = spawn_stub();

    let workers: Vec<_> = (0..10u32)
        .map(|thread_index| {
            let compiler = compiler.clone();
            thread::spawn(move || {
                for round in 0..10 {
                    let literal = format!("width: {thread_index}px");
                    // The first round staggers response times so later
                    // threads finish before earlier ones and answers arrive
                    // out of submission order.
                    let source = if round == 0 {
                        format!("!sleep {}\n{literal}", (10 - thread_index) * 20)
                    } else {
                        literal.clone()
                    };
                    let result = compiler
                        .compile(CompileRequest::new(source))
                        .expect("compile failed");
                    assert_eq!(
                        result.css, literal,
                        "thread {thread_index} received another caller's response"
                    );
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker thread panicked");
    }
    compiler.close();
}

#[rstest]
fn responses_arriving_out_of_order_still_correlate() {
    let compiler = spawn_stub();

    // The slow request is submitted first but must resolve last.
    let slow = {
        let compiler = compiler.clone();
        thread::spawn(move || {
            compiler
                .compile(CompileRequest::new("!sleep 400\nwidth: 1px"))
                .expect("slow compile failed")
        })
    };
    let fast = compiler
        .compile(CompileRequest::new("width: 2px"))
        .expect("fast compile failed");

    assert_eq!(fast.css, "width: 2px");
    assert_eq!(slow.join().expect("slow thread panicked").css, "width: 1px");
    compiler.close();
}
