//! Frame loop: a pacing thread ticks a frame thread over a bounded channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::HeartbeatSettings;
use crate::region::RegionServer;

/// Frame times over the last `window` frames, for the average and worst
/// frame a finished loop reports.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    recent: VecDeque<Duration>,
    window: usize,
    total: Duration,
}

impl FrameTimer {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            recent: VecDeque::with_capacity(window),
            window,
            total: Duration::ZERO,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        if self.recent.len() == self.window {
            if let Some(oldest) = self.recent.pop_front() {
                self.total -= oldest;
            }
        }
        self.recent.push_back(dt);
        self.total += dt;
    }

    pub fn average(&self) -> Duration {
        match u32::try_from(self.recent.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total / n,
        }
    }

    /// Slowest frame still in the window.
    pub fn max(&self) -> Duration {
        self.recent.iter().copied().max().unwrap_or(Duration::ZERO)
    }
}

/// What a finished frame loop reports.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frames: u64,
    pub timer: FrameTimer,
}

/// A running frame loop for one region.
///
/// The pacer sends one signal per interval; a slow frame makes it wait
/// rather than queue up frames.
pub struct FrameLoop {
    stop: Arc<AtomicBool>,
    pacer: Option<JoinHandle<()>>,
    frames: Option<JoinHandle<FrameReport>>,
}

impl FrameLoop {
    /// Start ticking `server`. With `max_frames`, the frame thread stops by
    /// itself after that many frames.
    pub fn start(server: Arc<RegionServer>, settings: HeartbeatSettings, max_frames: Option<u64>) -> std::io::Result<Self> {
        let interval = settings.frame_interval();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::sync_channel::<()>(1);

        let pacer_stop = Arc::clone(&stop);
        let pacer = thread::Builder::new()
            .name("frame-pacer".into())
            .spawn(move || pace(tx, interval, &pacer_stop))?;

        let frame_stop = Arc::clone(&stop);
        let window = settings.timer_window;
        let frames = thread::Builder::new()
            .name(format!("frame-{}", server.scene().descriptor().name))
            .spawn(move || {
                let mut timer = FrameTimer::new(window);
                let mut frames = 0u64;
                let mut last = Instant::now();
                for () in rx.iter() {
                    let started = Instant::now();
                    let dt = started.duration_since(last).as_secs_f32();
                    last = started;
                    server.tick(dt);
                    timer.record(started.elapsed());
                    frames += 1;
                    if max_frames.is_some_and(|max| frames >= max) || frame_stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                frame_stop.store(true, Ordering::Relaxed);
                tracing::debug!(frames, average = ?timer.average(), "frame loop finished");
                FrameReport { frames, timer }
            })?;

        Ok(Self {
            stop,
            pacer: Some(pacer),
            frames: Some(frames),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Relaxed)
    }

    /// Wait for the frame thread to finish on its own.
    pub fn wait(mut self) -> FrameReport {
        self.join()
    }

    /// Stop both threads and return what the frame thread measured.
    pub fn stop(mut self) -> FrameReport {
        self.stop.store(true, Ordering::Relaxed);
        self.join()
    }

    fn join(&mut self) -> FrameReport {
        let report = self
            .frames
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_else(|| FrameReport {
                frames: 0,
                timer: FrameTimer::new(1),
            });
        self.stop.store(true, Ordering::Relaxed);
        if let Some(pacer) = self.pacer.take() {
            let _ = pacer.join();
        }
        report
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if self.frames.is_some() || self.pacer.is_some() {
            self.stop.store(true, Ordering::Relaxed);
            self.join();
        }
    }
}

fn pace(tx: SyncSender<()>, interval: Duration, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(interval);
        if tx.send(()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_frame_shows_in_max_and_average() {
        let mut timer = FrameTimer::new(4);
        for ms in [4, 5, 120, 3] {
            timer.record(Duration::from_millis(ms));
        }

        assert_eq!(timer.max(), Duration::from_millis(120));
        assert_eq!(timer.average(), Duration::from_millis(33));
    }

    #[test]
    fn old_frames_leave_the_window() {
        let mut timer = FrameTimer::new(2);
        timer.record(Duration::from_millis(90));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.average(), Duration::from_millis(25));
        assert_eq!(timer.max(), Duration::from_millis(30));
    }

    #[test]
    fn empty_timer_reports_zero() {
        let timer = FrameTimer::new(0);
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.max(), Duration::ZERO);
    }
}
