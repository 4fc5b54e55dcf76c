//! Supervisor + status reporter: restarts any transport's main loop on
//! error and prints a light activity indicator so a server running
//! unattended on a console still shows signs of life.

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info};

use crate::error::Error;
use crate::manager::StreamManager;

const RESTART_DELAY: Duration = Duration::from_secs(1);
const TICK: Duration = Duration::from_millis(300);
const ACTIVITY_WINDOW: Duration = Duration::from_millis(300);
const DOTS_PER_LINE: usize = 16;

/// A lock shared with `tracing`'s writer so the status line and log lines
/// never interleave mid-line. The dispatcher itself never takes this lock;
/// it only matters between the reporter and whatever prints stdout lines
/// around it, which in this crate is just the reporter itself.
static STDOUT_GUARD: Mutex<()> = Mutex::new(());

/// Runs `body` forever: on any error, cleans the manager's streams, logs the
/// failure, sleeps `RESTART_DELAY`, and calls `body` again. Never returns —
/// the only way out is the process exiting.
pub fn run_supervised(name: &str, manager: &StreamManager, body: impl Fn() -> Result<(), Error>) -> ! {
    loop {
        if let Err(err) = body() {
            error!(transport = name, %err, "transport loop exited, restarting");
        } else {
            info!(transport = name, "transport loop exited cleanly, restarting");
        }
        manager.clean();
        std::thread::sleep(RESTART_DELAY);
    }
}

/// Background thread printing one `.` every `TICK` while the manager has
/// seen recent stream traffic, wrapping at `DOTS_PER_LINE` dots per line.
/// Dropping the returned handle stops the thread and leaves the cursor on a
/// fresh line.
pub struct StatusReporter {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl StatusReporter {
    pub fn spawn(manager: Arc<StreamManager>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("sdsio-status".into())
            .spawn(move || {
                let mut column = 0usize;
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(TICK);
                    if !manager.recently_active(ACTIVITY_WINDOW) {
                        continue;
                    }
                    let _guard = STDOUT_GUARD.lock().unwrap();
                    print!(".");
                    column += 1;
                    if column >= DOTS_PER_LINE {
                        println!();
                        column = 0;
                    }
                    let _ = std::io::stdout().flush();
                }
                if column > 0 {
                    let _guard = STDOUT_GUARD.lock().unwrap();
                    println!();
                }
            })
            .expect("failed to spawn status reporter thread");
        Self { stop, handle: Some(handle) }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
