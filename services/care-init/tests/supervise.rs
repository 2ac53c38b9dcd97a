//! Service supervision.
//!
//! `supervise` reaps every exited child of the test process, so it must not
//! share a binary with tests that await their own children. Keep this file to
//! a single test.

use care_init::process::{run, supervise};
use care_init::CommandSpec;

#[tokio::test]
async fn supervise_reports_exit_and_reaps_orphans() {
    let clean = CommandSpec::new("sh").args(["-c", "exit 5"]);
    assert_eq!(supervise(&clean).await.unwrap(), 5);

    let killed = CommandSpec::new("sh").args(["-c", "kill -TERM $$"]);
    assert_eq!(supervise(&killed).await.unwrap(), 128 + 15);

    // Leaves a background child behind; reaping afterwards must not disturb
    // later commands.
    let forks = CommandSpec::new("sh").args(["-c", "sleep 0 & exit 0"]);
    assert_eq!(supervise(&forks).await.unwrap(), 0);

    let after = CommandSpec::new("sh").args(["-c", "exit 2"]);
    assert_eq!(run(&after).await.unwrap(), 2);
}
