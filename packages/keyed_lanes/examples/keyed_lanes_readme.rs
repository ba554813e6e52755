//! Example from the README.

use std::sync::mpsc;

use keyed_lanes::Scheduler;

fn main() {
    let scheduler = Scheduler::new(4).unwrap();
    let (tx, rx) = mpsc::channel();

    for account in ["alice", "bob", "carol"] {
        for step in 0..3 {
            let tx = tx.clone();
            scheduler.submit(account, move || tx.send((account, step)).unwrap());
        }
    }
    drop(tx);

    for (account, step) in rx.iter().take(9) {
        println!("{account}: step {step}");
    }

    // Follow-up work can be submitted from inside a task.
    let submitter = scheduler.submitter();
    let (done_tx, done_rx) = mpsc::channel();
    scheduler.submit("alice", move || {
        submitter.submit("audit", move || done_tx.send("audited").unwrap());
    });

    assert_eq!(done_rx.recv().unwrap(), "audited");
}
