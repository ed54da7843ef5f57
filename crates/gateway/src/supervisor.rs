//! Audio Front Controller, SPEC_FULL.md §4.8: negotiates the capture device
//! and sampling rate, instantiates every pipeline stage, and owns their
//! lifecycle behind one coherent `start`/`stop` pair.
//!
//! Grounded on the teacher's runtime supervisor: worker-per-stage threads
//! joined on stop, a validated `StateManager` state machine, and a single
//! error-callback sink (`onRuntimeError`) rather than per-stage callbacks.
//! Stage ownership follows the pipeline's data order (Capture Reader through
//! Dispatcher); later stages that have no thread of their own (the Validator,
//! Preserver and Dispatcher are plain synchronous objects) live inside the
//! last worker thread in that order, so a thread's natural exit cascades
//! downstream to upstream. `stop()` drains that cascade by halting the
//! Capture Reader first: signalling the sink end before the source would
//! leave the source still producing into a pipeline with nowhere left to
//! drain, which reverses construction order in name only, not in effect.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use fme_audio::{
    negotiate_rate, AudioDeviceAdapter, CaptureConfig, CaptureReader, CpalDeviceAdapter,
    DualDownsampler, RecordFrame,
};
use fme_foundation::{AppState, GatewayConfig, GatewayError, StateManager, ToneSearchError};
use fme_sequence::{
    AudioPreserver, Sequence, SequenceDispatcher, SequenceSink, SequenceValidator, ValidatorParams,
};
use fme_spectral::{SpectrogramPair, StftParams};
use fme_telemetry::PipelineMetrics;
use fme_tonesearch::{SearcherParams, ToneSearcher};

/// Sink for errors any worker hits at runtime, the `onRuntimeError`
/// callback. Called from a worker thread; must not block.
pub type ErrorCallback = Arc<dyn Fn(GatewayError) + Send + Sync>;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker thread panicked with a non-string payload".to_string()
    }
}

pub struct AudioFrontController {
    config: GatewayConfig,
    state: Arc<StateManager>,
    metrics: PipelineMetrics,
    dispatcher: Arc<SequenceDispatcher>,
    on_error: ErrorCallback,

    capture: CaptureReader,
    spectrogram_pair: Option<Arc<SpectrogramPair>>,
    processing_handle: Option<JoinHandle<()>>,
    tone_handle: Option<JoinHandle<()>>,
    sequence_handle: Option<JoinHandle<()>>,
}

impl AudioFrontController {
    pub fn new(config: GatewayConfig, on_error: ErrorCallback) -> Self {
        Self {
            config,
            state: Arc::new(StateManager::new()),
            metrics: PipelineMetrics::new(),
            dispatcher: Arc::new(SequenceDispatcher::new(SequenceSink::Summary(Vec::new()))),
            on_error,
            capture: CaptureReader::new(),
            spectrogram_pair: None,
            processing_handle: None,
            tone_handle: None,
            sequence_handle: None,
        }
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.clone()
    }

    pub fn dispatcher(&self) -> Arc<SequenceDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn state(&self) -> AppState {
        self.state.current()
    }

    /// Candidate input device names, in the adapter's priority order, per
    /// the `--list-devices` CLI surface.
    pub fn list_devices() -> Vec<String> {
        CpalDeviceAdapter::new().candidate_device_names()
    }

    /// Builds every stage and starts their worker threads. Fails fast on a
    /// malformed configuration before any worker is spawned.
    pub fn start(&mut self) -> Result<(), GatewayError> {
        self.config.validate()?;
        self.state.transition(AppState::Running)?;

        let adapter: Box<dyn AudioDeviceAdapter> = Box::new(CpalDeviceAdapter::new());
        let negotiated = negotiate_rate(
            adapter.as_ref(),
            self.config.device.as_deref(),
            &self.config.audio.candidate_sampling_freqs,
        )?;
        let samples_per_buf = ((self.config.audio.sample_length_secs
            * negotiated.sample_rate as f64)
            .round()
            .max(1.0)) as usize;

        let capture_config = CaptureConfig {
            device_name: self.config.device.clone(),
            candidate_sampling_freqs: self.config.audio.candidate_sampling_freqs.clone(),
            channels: self.config.audio.channel_count,
            channel_index: self.config.audio.channel_index,
            samples_per_buf,
            max_queue_length: self.config.audio.max_queue_length,
            max_missed_attempts: self.config.audio.max_missed_attempts,
            watchdog_timeout: self.config.audio.watchdog_timeout_secs.map(Duration::from_secs),
        };

        let on_error_capture = Arc::clone(&self.on_error);
        let (input_rate, audio_rx) =
            self.capture
                .start(adapter, capture_config, move |e| on_error_capture(e.into()))?;
        let watchdog_handle = self.capture.watchdog_handle();

        let recording_rate_requested = self
            .config
            .recording
            .as_ref()
            .and(self.config.audio.recording_sample_rate);

        let downsampler = DualDownsampler::new(
            input_rate,
            self.config.audio.max_required_proc_freq,
            self.config.audio.trans_width_proc,
            self.config.audio.trans_width_rec,
            recording_rate_requested,
        )?;
        let proc_rate = downsampler.proc_sample_rate();
        let rec_rate = downsampler.rec_sample_rate();

        let fine_time_params = StftParams {
            window_len_ms: self.config.detection.sample_length_ms,
            fft_size: self.config.detection.freq_resolution,
            overlap: self.config.detection.overlap,
            delta: self.config.detection.delta,
            max_num_peaks: self.config.detection.max_num_peaks,
        };
        let fine_freq_params = StftParams {
            window_len_ms: self.config.detection.sample_length_coarse_ms,
            fft_size: self.config.detection.freq_resolution_coarse,
            overlap: self.config.detection.overlap_coarse,
            delta: self.config.detection.delta_coarse,
            max_num_peaks: self.config.detection.max_num_peaks_coarse,
        };
        let spectrogram_pair = Arc::new(SpectrogramPair::spawn(
            proc_rate,
            fine_time_params,
            fine_freq_params,
        )?);
        let fine_time_rx = spectrogram_pair.fine_time_receiver();
        let fine_freq_rx = spectrogram_pair.fine_freq_receiver();
        self.spectrogram_pair = Some(Arc::clone(&spectrogram_pair));

        let searcher_params = SearcherParams {
            max_delta_f: self.config.detection.max_delta_f,
            max_freq_dev_constrained: self.config.detection.max_freq_dev_constrained,
            max_freq_dev_unconstrained: self.config.detection.max_freq_dev_unconstrained,
            num_neighbours: self.config.detection.num_neighbours,
            eval_tone_length_secs: self.config.detection.eval_tone_length_ms / 1_000.0,
            search_freqs: self.config.detection.search_freqs.clone(),
        };
        let tone_searcher = ToneSearcher::new(searcher_params)?;

        let num_slots = self.config.detection.search_freqs.len();
        let validator_params = ValidatorParams {
            code_length: self.config.fme.code_length,
            min_length_secs: self.config.fme.min_length_ms / 1_000.0,
            max_length_secs: self.config.fme.max_length_ms / 1_000.0,
            excess_time_secs: self.config.fme.excess_time_ms / 1_000.0,
            delta_t_max_twice_secs: self.config.fme.delta_t_max_twice_ms / 1_000.0,
            max_tone_level_ratio: self.config.fme.max_tone_level_ratio,
            zero_slot: num_slots - 2,
            repetition_slot: num_slots - 1,
        };
        let validator = SequenceValidator::new(validator_params)?;

        let preserver = match (&self.config.recording, rec_rate) {
            (Some(window), Some(rate)) => Some(AudioPreserver::new(window.clone(), rate)?),
            _ => None,
        };
        let preserver_enabled = preserver.is_some();

        let (tone_tx, tone_rx) = crossbeam_channel::unbounded();
        let (record_tx, record_rx_real) = crossbeam_channel::unbounded::<RecordFrame>();
        let record_rx: Receiver<RecordFrame> = if preserver_enabled {
            record_rx_real
        } else {
            crossbeam_channel::never()
        };

        let metrics_proc = self.metrics.clone();
        let on_error_proc = Arc::clone(&self.on_error);
        let spectrogram_for_processing = Arc::clone(&spectrogram_pair);
        let processing_handle = thread::Builder::new()
            .name("fme-processing".to_string())
            .spawn(move || {
                let mut downsampler = downsampler;
                let result = panic::catch_unwind(AssertUnwindSafe(|| loop {
                    match audio_rx.recv() {
                        Ok(frame) => {
                            metrics_proc.record_frame_captured();
                            metrics_proc.set_capture_queue_depth(audio_rx.len());
                            let (proc_frame, rec_frame) = downsampler.process(&frame.samples);
                            spectrogram_for_processing.push(&proc_frame.samples);
                            if let Some(rec_frame) = rec_frame {
                                let _ = record_tx.send(rec_frame);
                            }
                        }
                        Err(_) => break,
                    }
                }));
                if let Err(payload) = result {
                    on_error_proc(GatewayError::Fatal(panic_message(payload)));
                }
            })
            .expect("failed to spawn processing thread");

        let on_error_tone = Arc::clone(&self.on_error);
        let tone_handle = thread::Builder::new()
            .name("fme-tonesearch".to_string())
            .spawn(move || {
                let mut tone_searcher = tone_searcher;
                let result = panic::catch_unwind(AssertUnwindSafe(|| 'outer: loop {
                    crossbeam_channel::select! {
                        recv(fine_time_rx) -> msg => match msg {
                            Ok(frame) => tone_searcher.push_fine(frame),
                            Err(_) => break 'outer,
                        },
                        recv(fine_freq_rx) -> msg => match msg {
                            Ok(frame) => tone_searcher.push_coarse(frame),
                            Err(_) => break 'outer,
                        },
                    }
                    loop {
                        match tone_searcher.step() {
                            Ok(tones) => {
                                for tone in tones {
                                    let _ = tone_tx.send(tone);
                                }
                            }
                            Err(ToneSearchError::InsufficientLookahead) => break,
                            Err(_) => break,
                        }
                    }
                }));
                if let Err(payload) = result {
                    on_error_tone(GatewayError::Fatal(panic_message(payload)));
                }
            })
            .expect("failed to spawn tone search thread");

        let dispatcher_thread = Arc::clone(&self.dispatcher);
        let metrics_seq = self.metrics.clone();
        let on_error_seq = Arc::clone(&self.on_error);
        let metrics_log_interval =
            Duration::from_secs(self.config.metrics_log_interval_secs.max(1));
        let sequence_handle = thread::Builder::new()
            .name("fme-sequence".to_string())
            .spawn(move || {
                let mut validator = validator;
                let mut preserver = preserver;
                let mut record_rx = record_rx;
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut pending_for_preserver: Vec<Sequence> = Vec::new();
                    let ticker = crossbeam_channel::tick(metrics_log_interval);
                    loop {
                        crossbeam_channel::select! {
                            recv(tone_rx) -> msg => match msg {
                                Ok(tone) => {
                                    metrics_seq.record_tone_found();
                                    if let Some((first, code)) = validator.push(tone) {
                                        metrics_seq.record_sequence_validated();
                                        let sequence = Sequence {
                                            reference_start: first.reference_start,
                                            calc_start: first.calc_start,
                                            code,
                                            info: None,
                                        };
                                        match dispatcher_thread.dispatch(sequence.clone()) {
                                            Ok(()) => metrics_seq.record_sequence_dispatched(),
                                            Err(_) => metrics_seq.record_sequence_rejected(),
                                        }
                                        if preserver.is_some() {
                                            pending_for_preserver.push(sequence);
                                        }
                                    }
                                }
                                Err(_) => break,
                            },
                            recv(record_rx) -> msg => match msg {
                                Ok(frame) => {
                                    if let Some(p) = preserver.as_mut() {
                                        let seqs = std::mem::take(&mut pending_for_preserver);
                                        let clips = p.tick(Some(frame), seqs);
                                        metrics_seq.set_preserver_state(
                                            p.pending_count(),
                                            p.retained_samples(),
                                        );
                                        for clip in clips {
                                            dispatcher_thread.dispatch_clip(&clip);
                                            metrics_seq.record_clip_delivered();
                                        }
                                    }
                                }
                                Err(_) => record_rx = crossbeam_channel::never(),
                            },
                            recv(ticker) -> _ => {
                                if let Some(watchdog) = watchdog_handle.as_ref() {
                                    metrics_seq.set_silence_watchdog(watchdog.is_triggered());
                                }
                                metrics_seq.log_snapshot();
                            }
                        }
                    }
                }));
                if let Err(payload) = result {
                    on_error_seq(GatewayError::Fatal(panic_message(payload)));
                }
            })
            .expect("failed to spawn sequence thread");

        self.processing_handle = Some(processing_handle);
        self.tone_handle = Some(tone_handle);
        self.sequence_handle = Some(sequence_handle);

        tracing::info!(
            input_rate,
            proc_rate,
            rec_rate = rec_rate.unwrap_or(0),
            recording = preserver_enabled,
            "audio front controller started"
        );
        Ok(())
    }

    /// Idempotent: a second call while already stopped is a no-op.
    pub fn stop(&mut self) -> Result<(), GatewayError> {
        if matches!(self.state.current(), AppState::Stopped) {
            return Ok(());
        }
        self.state.transition(AppState::Stopping)?;

        // Halting the Capture Reader first lets every downstream thread
        // drain and exit on its own via the channel-close cascade described
        // at module level, rather than needing a per-stage cancel signal.
        self.capture.stop();
        if let Some(handle) = self.processing_handle.take() {
            let _ = handle.join();
        }

        self.spectrogram_pair = None;
        if let Some(handle) = self.tone_handle.take() {
            let _ = handle.join();
        }

        if let Some(handle) = self.sequence_handle.take() {
            let _ = handle.join();
        }

        self.state.transition(AppState::Stopped)?;
        Ok(())
    }
}

impl Drop for AudioFrontController {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
