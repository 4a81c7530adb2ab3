//! One thread owning every request deadline of a queue.
//!
//! Handles send `Arm`/`Cancel` commands over an unbounded channel; the thread
//! sleeps in `recv_timeout` until the next command or the earliest deadline.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

pub type TimerToken = u64;

/// Upper bound for a deadline whose delay overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 86_400);

type Callback = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Arm {
        token: TimerToken,
        deadline: Instant,
        fire: Callback,
    },
    Cancel(TimerToken),
    Shutdown,
}

#[derive(Clone)]
pub struct TimerHandle {
    sender: Sender<Command>,
    next_token: Arc<AtomicU64>,
}

impl TimerHandle {
    /// Runs `fire` on the timer thread once `after` has elapsed, unless the
    /// returned token is cancelled first.
    pub fn arm(&self, after: Duration, fire: impl FnOnce() + Send + 'static) -> TimerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let deadline = now.checked_add(after).unwrap_or_else(|| {
            spvd_log::log_warn!(
                "timer delay {:?} out of range, clamping token {} to {:?}",
                after,
                token,
                FAR_FUTURE
            );
            now.checked_add(FAR_FUTURE).unwrap_or(now)
        });
        let _ = self.sender.send(Command::Arm {
            token,
            deadline,
            fire: Box::new(fire),
        });
        token
    }

    pub fn cancel(&self, token: TimerToken) {
        let _ = self.sender.send(Command::Cancel(token));
    }
}

pub struct RequestTimer {
    handle: TimerHandle,
    thread: Option<JoinHandle<()>>,
}

impl RequestTimer {
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = unbounded();
        let thread = thread::Builder::new()
            .name("request-timer".to_string())
            .spawn(move || run(receiver))?;
        Ok(Self {
            handle: TimerHandle {
                sender,
                next_token: Arc::new(AtomicU64::new(1)),
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> &TimerHandle {
        &self.handle
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let _ = self.handle.sender.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn run(commands: Receiver<Command>) {
    let mut deadlines: BTreeMap<(Instant, TimerToken), Callback> = BTreeMap::new();
    let mut armed: HashMap<TimerToken, Instant> = HashMap::new();

    loop {
        fire_expired(&mut deadlines, &mut armed);

        let next = deadlines.keys().next().map(|(deadline, _)| *deadline);
        let command = match next {
            Some(deadline) => {
                match commands.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match commands.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
        };

        match command {
            Command::Arm {
                token,
                deadline,
                fire,
            } => {
                armed.insert(token, deadline);
                deadlines.insert((deadline, token), fire);
            }
            Command::Cancel(token) => {
                if let Some(deadline) = armed.remove(&token) {
                    deadlines.remove(&(deadline, token));
                }
            }
            Command::Shutdown => return,
        }
    }
}

fn fire_expired(
    deadlines: &mut BTreeMap<(Instant, TimerToken), Callback>,
    armed: &mut HashMap<TimerToken, Instant>,
) {
    let now = Instant::now();
    while let Some(entry) = deadlines.first_entry() {
        if entry.key().0 > now {
            break;
        }
        let ((_, token), fire) = entry.remove_entry();
        armed.remove(&token);
        if panic::catch_unwind(AssertUnwindSafe(fire)).is_err() {
            spvd_log::log_error!("request timeout callback panicked (token {})", token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let timer = RequestTimer::spawn().expect("timer");
        let (tx, rx) = unbounded();
        for (label, millis) in [("late", 120u64), ("early", 10), ("middle", 60)] {
            let tx = tx.clone();
            timer.handle().arm(Duration::from_millis(millis), move || {
                let _ = tx.send(label);
            });
        }
        let order: Vec<&str> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("fired"))
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn cancelled_deadline_never_fires() {
        let timer = RequestTimer::spawn().expect("timer");
        let (tx, rx) = unbounded();
        let cancelled = {
            let tx = tx.clone();
            timer.handle().arm(Duration::from_millis(30), move || {
                let _ = tx.send("cancelled");
            })
        };
        timer.handle().arm(Duration::from_millis(80), move || {
            let _ = tx.send("kept");
        });
        timer.handle().cancel(cancelled);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("kept"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn overflowing_delay_is_clamped_and_cancellable() {
        spvd_log::enable_capture(1024);
        let timer = RequestTimer::spawn().expect("timer");
        let (tx, rx) = unbounded();
        let distant = {
            let tx = tx.clone();
            timer.handle().arm(Duration::MAX, move || {
                let _ = tx.send("distant");
            })
        };
        timer.handle().arm(Duration::from_millis(20), move || {
            let _ = tx.send("near");
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("near"));
        timer.handle().cancel(distant);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        let needle = format!("clamping token {distant} ");
        assert!(spvd_log::capture_snapshot(1024).iter().any(|entry| {
            entry.level == spvd_log::Level::Warn && entry.msg.contains(&needle)
        }));
    }

    #[test]
    fn panicking_callback_does_not_stop_the_timer() {
        let timer = RequestTimer::spawn().expect("timer");
        let (tx, rx) = unbounded();
        timer.handle().arm(Duration::ZERO, || panic!("boom"));
        timer.handle().arm(Duration::from_millis(20), move || {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
