//! Sensor polling.
//!
//! A [`MeasurementJob`] reads one wavelength for a fixed time, averaging
//! consecutive readings over fixed windows. Every completed window becomes one
//! [`RawSample`], delivered in order over a tokio channel.
//!
//! ```text
//! set_wavelength ─ settle ─┬─ window 0 ─┬─ window 1 ─┬─ ... ─┬─ window n ─┐
//!                          t=0          avg          2·avg   duration     done
//! ```
//!
//! Windows start while `elapsed <= duration`, so a job yields
//! `floor(duration / window) + 1` samples. A stop request is honoured between
//! readings; the window in flight is discarded.
//!
//! [`MeasurementManager`] runs queued jobs one after the other against a shared
//! sensor. [`LiveAcquisition`] runs a single blind-mode job and classifies its
//! samples into a session as they arrive.

use crate::config::AcquisitionSettings;
use crate::data::series::RawSample;
use crate::data::storage::RawTsvWriter;
use crate::error::{AppResult, LpmError};
use crate::hardware::PowerSensor;
use crate::plan::AcquisitionPlan;
use crate::session::LpmSession;
use chrono::{Local, NaiveDateTime};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// One fixed-wavelength measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementJob {
    /// Detector wavelength in nm
    pub wavelength: u32,
    /// Power setting recorded with every sample, in percent
    pub setting: u32,
    /// Total measuring time
    pub duration: Duration,
    /// Averaging window
    pub average_interval: Duration,
}

impl MeasurementJob {
    /// Job from times in seconds.
    ///
    /// # Errors
    /// [`LpmError::InvalidPlan`] for non-positive or non-finite times.
    pub fn new(wavelength: u32, setting: u32, duration_s: f64, average_s: f64) -> AppResult<Self> {
        let to_duration = |seconds: f64, what: &str| {
            if seconds.is_finite() && seconds > 0.0 {
                Ok(Duration::from_secs_f64(seconds))
            } else {
                Err(LpmError::InvalidPlan(format!(
                    "{what} must be a positive number of seconds, got {seconds}"
                )))
            }
        };
        Ok(Self {
            wavelength,
            setting,
            duration: to_duration(duration_s, "measurement duration")?,
            average_interval: to_duration(average_s, "averaging window")?,
        })
    }
}

/// Cloneable stop request shared between a running acquisition and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// New, not yet stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next reading boundary.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous stop request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Delays applied around sensor readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionTiming {
    /// Wait after selecting a wavelength
    pub settle_delay: Duration,
    /// Pause between readings inside a window
    pub poll_interval: Duration,
}

impl Default for AcquisitionTiming {
    fn default() -> Self {
        Self::from(&AcquisitionSettings::default())
    }
}

impl From<&AcquisitionSettings> for AcquisitionTiming {
    fn from(settings: &AcquisitionSettings) -> Self {
        Self {
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
        }
    }
}

/// Progress of a running acquisition.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementEvent {
    /// A job began.
    Started {
        /// Position in the queue
        job: usize,
        /// Detector wavelength in nm
        wavelength: u32,
    },
    /// An averaging window completed.
    Sample {
        /// Position in the queue
        job: usize,
        /// The averaged reading
        sample: RawSample,
    },
    /// A job ended.
    Finished {
        /// Position in the queue
        job: usize,
        /// Samples delivered
        samples: usize,
        /// Whether it ended on a stop request
        stopped: bool,
    },
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    /// Samples delivered
    pub samples: usize,
    /// Whether it ended on a stop request
    pub stopped: bool,
}

/// Averaged readings of one finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSeries {
    /// The job that produced the readings
    pub job: MeasurementJob,
    /// Samples in arrival order
    pub samples: Vec<RawSample>,
    /// Whether the job ended on a stop request
    pub stopped: bool,
}

impl MeasurementSeries {
    /// Averaged power per window.
    pub fn powers(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.power).collect()
    }
}

/// Maps the runtime clock onto wall-clock timestamps.
///
/// One clock is shared by all jobs of a run so timestamps keep increasing
/// across jobs, also under a paused test clock.
#[derive(Debug, Clone, Copy)]
pub struct SampleClock {
    origin: Instant,
    wall_origin: NaiveDateTime,
}

impl SampleClock {
    /// Clock anchored at the current instant.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Local::now().naive_local(),
        }
    }

    /// Wall-clock time of `instant`.
    pub fn wall_time(&self, instant: Instant) -> NaiveDateTime {
        let elapsed = instant.saturating_duration_since(self.origin);
        self.wall_origin
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// Run one job on an already connected sensor.
///
/// Window `k` is scheduled at `k * average_interval` after the settle delay, so
/// the sample count does not depend on how long individual readings take.
/// Samples are sent as [`MeasurementEvent::Sample`] tagged with `job_index`. A
/// closed receiver ends the job like a stop request.
pub async fn run_job(
    sensor: &dyn PowerSensor,
    job_index: usize,
    job: &MeasurementJob,
    timing: AcquisitionTiming,
    clock: &SampleClock,
    stop: &StopHandle,
    tx: &mpsc::UnboundedSender<MeasurementEvent>,
) -> AppResult<JobOutcome> {
    sensor.set_wavelength(job.wavelength).await?;
    sleep(timing.settle_delay).await;

    let discard_first = sensor.first_reading_unreliable();
    let start = Instant::now();
    let end = start + job.duration;

    let mut windows = 0u32;
    let mut samples = 0usize;
    loop {
        let window_start = start + job.average_interval * windows;
        if window_start > end {
            break;
        }
        if stop.is_stopped() {
            return Ok(stopped(job, samples));
        }

        let Some((power, temperature)) =
            average_window(sensor, window_start + job.average_interval, timing, stop).await?
        else {
            return Ok(stopped(job, samples));
        };

        windows += 1;
        if discard_first && windows == 1 {
            debug!(wavelength = job.wavelength, "Discarding first window");
            continue;
        }

        let sample = RawSample {
            timestamp: clock.wall_time(window_start),
            wavelength: job.wavelength,
            setting: job.setting,
            power,
            temperature,
        };
        if tx
            .send(MeasurementEvent::Sample {
                job: job_index,
                sample,
            })
            .is_err()
        {
            warn!(wavelength = job.wavelength, "Sample receiver closed");
            return Ok(JobOutcome {
                samples,
                stopped: true,
            });
        }
        samples += 1;
    }

    Ok(JobOutcome {
        samples,
        stopped: false,
    })
}

fn stopped(job: &MeasurementJob, samples: usize) -> JobOutcome {
    info!(wavelength = job.wavelength, samples, "Stop requested");
    JobOutcome {
        samples,
        stopped: true,
    }
}

/// Average readings until `window_end`; `None` when stopped mid-window.
async fn average_window(
    sensor: &dyn PowerSensor,
    window_end: Instant,
    timing: AcquisitionTiming,
    stop: &StopHandle,
) -> AppResult<Option<(f64, Option<f64>)>> {
    let mut power_total = 0.0;
    let mut count = 0usize;
    let mut temperature_total = 0.0;
    let mut temperature_count = 0usize;

    loop {
        power_total += sensor.measure_once().await?;
        count += 1;
        if let Some(t) = sensor.read_temperature().await? {
            temperature_total += t;
            temperature_count += 1;
        }

        let now = Instant::now();
        if now >= window_end {
            break;
        }
        if stop.is_stopped() {
            return Ok(None);
        }
        sleep((window_end - now).min(timing.poll_interval)).await;
        // the reading at `window_end` belongs to the next window
        if Instant::now() >= window_end {
            break;
        }
    }

    let temperature =
        (temperature_count > 0).then(|| temperature_total / temperature_count as f64);
    Ok(Some((power_total / count as f64, temperature)))
}

/// Sequential job queue over one sensor.
pub struct MeasurementManager {
    sensor: Arc<dyn PowerSensor>,
    timing: AcquisitionTiming,
    queue: VecDeque<MeasurementJob>,
    stop: StopHandle,
}

impl MeasurementManager {
    /// Manager for `sensor`.
    pub fn new(sensor: Arc<dyn PowerSensor>, timing: AcquisitionTiming) -> Self {
        Self {
            sensor,
            timing,
            queue: VecDeque::new(),
            stop: StopHandle::new(),
        }
    }

    /// Queue a job.
    pub fn add_measurement(&mut self, job: MeasurementJob) {
        debug!(wavelength = job.wavelength, setting = job.setting, "Measurement queued");
        self.queue.push_back(job);
    }

    /// Jobs not yet run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Handle that stops the running job and skips the rest of the queue.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run every queued job, streaming events to `tx`.
    ///
    /// The sensor is connected for the duration of the run and disconnected
    /// afterwards, also on error.
    pub async fn run(
        &mut self,
        tx: &mpsc::UnboundedSender<MeasurementEvent>,
    ) -> AppResult<Vec<(MeasurementJob, JobOutcome)>> {
        self.stop.reset();
        self.sensor.connect().await?;
        let clock = SampleClock::start();
        let result = self.run_queue(&clock, tx).await;
        let disconnected = self.sensor.disconnect().await;
        let outcomes = result?;
        disconnected?;
        Ok(outcomes)
    }

    async fn run_queue(
        &mut self,
        clock: &SampleClock,
        tx: &mpsc::UnboundedSender<MeasurementEvent>,
    ) -> AppResult<Vec<(MeasurementJob, JobOutcome)>> {
        let mut outcomes = Vec::with_capacity(self.queue.len());
        let mut index = 0;
        while let Some(job) = self.queue.pop_front() {
            if self.stop.is_stopped() {
                info!(skipped = self.queue.len() + 1, "Skipping remaining measurements");
                self.queue.clear();
                break;
            }
            info!(
                sensor = self.sensor.name(),
                wavelength = job.wavelength,
                setting = job.setting,
                "Measurement started"
            );
            // Progress events are best effort; a missing listener is not an error.
            let _ = tx.send(MeasurementEvent::Started {
                job: index,
                wavelength: job.wavelength,
            });
            let outcome = run_job(
                self.sensor.as_ref(),
                index,
                &job,
                self.timing,
                clock,
                &self.stop,
                tx,
            )
            .await?;
            let _ = tx.send(MeasurementEvent::Finished {
                job: index,
                samples: outcome.samples,
                stopped: outcome.stopped,
            });
            info!(
                wavelength = job.wavelength,
                samples = outcome.samples,
                "Measurement finished"
            );
            outcomes.push((job, outcome));
            index += 1;
        }
        Ok(outcomes)
    }

    /// Run every queued job and return the collected readings per job.
    pub async fn run_to_completion(&mut self) -> AppResult<Vec<MeasurementSeries>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcomes = self.run(&tx).await?;
        drop(tx);

        let mut series: Vec<MeasurementSeries> = outcomes
            .into_iter()
            .map(|(job, outcome)| MeasurementSeries {
                job,
                samples: Vec::with_capacity(outcome.samples),
                stopped: outcome.stopped,
            })
            .collect();
        while let Some(event) = rx.recv().await {
            if let MeasurementEvent::Sample { job, sample } = event {
                if let Some(entry) = series.get_mut(job) {
                    entry.samples.push(sample);
                }
            }
        }
        Ok(series)
    }
}

/// Counts reported by a finished live acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSummary {
    /// Samples received
    pub samples: usize,
    /// Samples that received a bucket
    pub assigned: usize,
    /// Whether the run ended on a stop request
    pub stopped: bool,
    /// Raw file written alongside, if any
    pub raw_file: Option<PathBuf>,
}

/// Blind-mode acquisition feeding an [`LpmSession`].
///
/// The detector stays at one wavelength for the whole plan while the light
/// source cycles through the signature; each averaged window is buffered,
/// optionally streamed to a raw file, and classified as it arrives.
pub struct LiveAcquisition {
    manager: MeasurementManager,
    writer: Option<RawTsvWriter>,
}

impl LiveAcquisition {
    /// Acquisition of `plan` on `sensor`.
    ///
    /// The detector wavelength and recorded setting come from `settings`, falling
    /// back to the plan's first wavelength and power. Windows last one readout
    /// interval.
    pub fn new(
        sensor: Arc<dyn PowerSensor>,
        plan: &AcquisitionPlan,
        settings: &AcquisitionSettings,
    ) -> AppResult<Self> {
        let wavelength = settings
            .wavelength
            .or_else(|| plan.wavelengths.first().copied())
            .ok_or_else(|| LpmError::InvalidPlan("no wavelengths".to_string()))?;
        let setting = settings
            .setting
            .or_else(|| plan.set_powers.first().copied())
            .ok_or_else(|| LpmError::InvalidPlan("no power settings".to_string()))?;

        let mut manager = MeasurementManager::new(sensor, AcquisitionTiming::from(settings));
        manager.add_measurement(MeasurementJob::new(
            wavelength,
            setting,
            plan.duration,
            plan.readout_interval,
        )?);
        Ok(Self {
            manager,
            writer: None,
        })
    }

    /// Stream every sample to `writer` as it arrives.
    pub fn with_writer(mut self, writer: RawTsvWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Handle that ends the acquisition at the next sample boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.manager.stop_handle()
    }

    /// Run to completion (or stop), classifying into `session`.
    ///
    /// The session leaves live mode on every exit path; a failed write or
    /// ingest stops the sensor task before the error is returned.
    pub async fn run(self, session: &mut LpmSession) -> AppResult<LiveSummary> {
        let Self {
            mut manager,
            mut writer,
        } = self;
        session.begin_live()?;

        let stop = manager.stop_handle();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { manager.run(&tx).await });

        let streamed = stream_samples(&mut rx, writer.as_mut(), session).await;
        if let Err(e) = &streamed {
            warn!(error = %e, "Live acquisition aborted");
            stop.stop();
        }
        drop(rx);

        let finished = task
            .await
            .map_err(|e| LpmError::Instrument(format!("acquisition task failed: {e}")))
            .and_then(|result| result);
        let flushed = writer.as_mut().map(RawTsvWriter::flush).transpose();
        session.end_live();

        let (samples, stopped) = streamed?;
        finished?;
        flushed?;
        Ok(LiveSummary {
            samples,
            assigned: session.store().assigned_count(),
            stopped,
            raw_file: writer.map(|w| w.path().to_path_buf()),
        })
    }
}

/// Write and classify samples until the channel closes. Returns the sample
/// count and whether a job was stopped.
async fn stream_samples(
    rx: &mut mpsc::UnboundedReceiver<MeasurementEvent>,
    mut writer: Option<&mut RawTsvWriter>,
    session: &mut LpmSession,
) -> AppResult<(usize, bool)> {
    let mut samples = 0usize;
    let mut stopped = false;
    while let Some(event) = rx.recv().await {
        match event {
            MeasurementEvent::Sample { sample, .. } => {
                if let Some(writer) = writer.as_deref_mut() {
                    writer.write_sample(&sample)?;
                    writer.flush()?;
                }
                session.ingest(sample)?;
                samples += 1;
            }
            MeasurementEvent::Finished { stopped: s, .. } => stopped |= s,
            MeasurementEvent::Started { wavelength, .. } => {
                debug!(wavelength, "Live acquisition running");
            }
        }
    }
    Ok((samples, stopped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedSensor;

    fn timing() -> AcquisitionTiming {
        AcquisitionTiming {
            settle_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
        }
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<MeasurementEvent>) -> Vec<RawSample> {
        let mut samples = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let MeasurementEvent::Sample { sample, .. } = event {
                samples.push(sample);
            }
        }
        samples
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_yields_one_sample_per_window() {
        let sensor = SimulatedSensor::new(2.0, 0.0, Some(0));
        sensor.connect().await.unwrap();
        let job = MeasurementJob::new(488, 80, 5.0, 1.0).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = run_job(&sensor, 0, &job, timing(), &SampleClock::start(), &StopHandle::new(), &tx)
            .await
            .unwrap();
        let samples = collect(&mut rx);

        assert_eq!(outcome, JobOutcome { samples: 6, stopped: false });
        assert_eq!(samples.len(), 6);
        assert!(samples.iter().all(|s| s.power == 2.0 && s.setting == 80));
        let step = samples[1].timestamp - samples[0].timestamp;
        assert_eq!(step.num_milliseconds(), 1000);
        assert_eq!(sensor.wavelength().await, Some(488));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreliable_first_window_is_dropped() {
        let sensor = SimulatedSensor::new(1.0, 0.0, Some(0)).with_unreliable_first_reading(true);
        sensor.connect().await.unwrap();
        let job = MeasurementJob::new(405, 50, 5.0, 1.0).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = run_job(&sensor, 0, &job, timing(), &SampleClock::start(), &StopHandle::new(), &tx)
            .await
            .unwrap();
        assert_eq!(outcome.samples, 5);
        assert_eq!(collect(&mut rx).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_window_in_flight() {
        let sensor = SimulatedSensor::new(1.0, 0.0, Some(0));
        sensor.connect().await.unwrap();
        let job = MeasurementJob::new(405, 50, 10.0, 1.0).unwrap();
        let stop = StopHandle::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stopper = stop.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            stopper.stop();
        });

        let outcome = run_job(&sensor, 0, &job, timing(), &SampleClock::start(), &stop, &tx).await.unwrap();
        assert!(outcome.stopped);
        assert_eq!(outcome.samples, 2);
        assert_eq!(collect(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_is_averaged() {
        let sensor = SimulatedSensor::new(1.0, 0.0, Some(0)).with_temperature(24.5);
        sensor.connect().await.unwrap();
        let job = MeasurementJob::new(405, 50, 1.0, 1.0).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        run_job(&sensor, 0, &job, timing(), &SampleClock::start(), &StopHandle::new(), &tx)
            .await
            .unwrap();
        let samples = collect(&mut rx);
        assert!(samples.iter().all(|s| s.temperature == Some(24.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_runs_queue_in_order() {
        let sensor = Arc::new(
            SimulatedSensor::new(1.0, 0.0, Some(0))
                .with_response(405, 2.0)
                .with_response(488, 3.0),
        );
        let mut manager = MeasurementManager::new(sensor.clone(), timing());
        manager.add_measurement(MeasurementJob::new(405, 80, 2.0, 1.0).unwrap());
        manager.add_measurement(MeasurementJob::new(488, 80, 2.0, 1.0).unwrap());
        assert_eq!(manager.pending(), 2);

        let series = manager.run_to_completion().await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].powers(), vec![2.0, 2.0, 2.0]);
        assert_eq!(series[1].powers(), vec![3.0, 3.0, 3.0]);
        assert!(series[1].samples[0].timestamp > series[0].samples[2].timestamp);
        assert_eq!(manager.pending(), 0);
        assert!(!sensor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_acquisition_classifies_signature() {
        use crate::plan::PulseOrder;
        use crate::signature::Signature;

        let plan = AcquisitionPlan {
            wavelengths: vec![405, 488],
            set_powers: vec![50],
            duration: 20.0,
            measurement_interval: 10.0,
            average_interval: 1.0,
            readout_interval: 1.0,
            signature_pause: 1.0,
            order: PulseOrder::Lp,
        };
        let profile = Signature::synthesize(&plan).unwrap().combined_profile().to_vec();
        let sensor = Arc::new(
            SimulatedSensor::new(4.0, 0.0, Some(0))
                .with_playback(profile, Duration::from_secs(1)),
        );
        let settings = AcquisitionSettings {
            settle_delay_ms: 0,
            poll_interval_ms: 100,
            ..Default::default()
        };

        let dir = tempfile::tempdir().unwrap();
        let writer = RawTsvWriter::create(dir.path().join("raw.tsv"), false).unwrap();
        let mut session = LpmSession::new(plan.clone()).unwrap();
        session.set_threshold(1.0).unwrap();

        let summary = LiveAcquisition::new(sensor, &plan, &settings)
            .unwrap()
            .with_writer(writer)
            .run(&mut session)
            .await
            .unwrap();

        assert_eq!(summary.samples, 21);
        assert!(!summary.stopped);
        assert!(summary.assigned > 0);
        assert!(!session.is_live());
        assert!(session.raw().samples().iter().all(|s| s.wavelength == 405 && s.setting == 50));
        let buckets = session.store().buckets();
        assert!(buckets.iter().flatten().any(|b| b.wavelength == 1));

        let written = crate::data::RawSeries::load(summary.raw_file.unwrap()).unwrap();
        assert_eq!(written.len(), 21);
    }

    fn blind_plan() -> AcquisitionPlan {
        AcquisitionPlan {
            wavelengths: vec![405, 488],
            set_powers: vec![50],
            duration: 20.0,
            measurement_interval: 10.0,
            average_interval: 1.0,
            readout_interval: 1.0,
            signature_pause: 1.0,
            order: crate::plan::PulseOrder::Lp,
        }
    }

    fn fast_settings() -> AcquisitionSettings {
        AcquisitionSettings {
            settle_delay_ms: 0,
            poll_interval_ms: 100,
            ..Default::default()
        }
    }

    /// Simulated sensor that fails once its readings run out.
    struct FlakySensor {
        inner: SimulatedSensor,
        readings_left: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PowerSensor for FlakySensor {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn connect(&self) -> anyhow::Result<()> {
            self.inner.connect().await
        }

        async fn disconnect(&self) -> anyhow::Result<()> {
            self.inner.disconnect().await
        }

        async fn set_wavelength(&self, wavelength: u32) -> anyhow::Result<()> {
            self.inner.set_wavelength(wavelength).await
        }

        async fn measure_once(&self) -> anyhow::Result<f64> {
            if self
                .readings_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                anyhow::bail!("detector unplugged");
            }
            self.inner.measure_once().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_failure_leaves_live_mode() {
        let plan = blind_plan();
        let sensor = Arc::new(FlakySensor {
            inner: SimulatedSensor::new(4.0, 0.0, Some(0)),
            readings_left: std::sync::atomic::AtomicUsize::new(25),
        });
        let mut session = LpmSession::new(plan.clone()).unwrap();

        let err = LiveAcquisition::new(sensor, &plan, &fast_settings())
            .unwrap()
            .run(&mut session)
            .await
            .unwrap_err();

        assert!(matches!(err, LpmError::Instrument(ref msg) if msg.contains("unplugged")));
        assert!(!session.is_live());
        assert!(!session.raw().is_empty());
        // threshold changes go back to offline reassignment
        session.set_threshold(1.0).unwrap();
        assert!(session.last_outcome().is_some());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(start_paused = true)]
    async fn test_write_failure_stops_acquisition() {
        let plan = blind_plan();
        let sensor = Arc::new(SimulatedSensor::new(4.0, 0.0, Some(0)));
        let writer = RawTsvWriter::create("/dev/full", false).unwrap();
        let mut session = LpmSession::new(plan.clone()).unwrap();

        let err = LiveAcquisition::new(sensor.clone(), &plan, &fast_settings())
            .unwrap()
            .with_writer(writer)
            .run(&mut session)
            .await
            .unwrap_err();

        assert!(matches!(err, LpmError::Io(_) | LpmError::Csv(_)));
        assert!(!session.is_live());
        assert_eq!(session.raw().len(), 0);
        assert!(!sensor.is_connected());
    }

    #[test]
    fn test_job_rejects_non_positive_times() {
        assert!(MeasurementJob::new(405, 80, 0.0, 1.0).is_err());
        assert!(MeasurementJob::new(405, 80, 5.0, f64::NAN).is_err());
    }
}
