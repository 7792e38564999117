//! Oscillators and audio sinks.
//!
//! Oscillators are phase accumulators: phase advances per sample from the
//! frequency input and persists across blocks, so block boundaries are
//! glitch-free. Phase is kept in `f64` to avoid drift over long sessions;
//! samples are `f32`.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::path::Path;
use std::sync::Arc;

use telar_core::{
    BlockQueue, Graph, Node, NodeDescriptor, NodePorts, PortSpec, QueueRegistry, RenderContext,
    Result, Value,
};
use telar_io::{AudioOutput, WavSink};

use crate::device_error;

/// Writes a block of zeros every tick.
#[derive(Debug, Default)]
pub struct SilenceNode;

const SILENCE: NodeDescriptor = NodeDescriptor {
    type_name: "SilenceNode",
    inputs: &[],
    outputs: &[PortSpec::stream("out")],
};

impl SilenceNode {
    /// Creates a silence source.
    pub fn new() -> Self {
        Self
    }

    const OUT: usize = 0;
}

impl Node for SilenceNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &SILENCE
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        ports.write_stream(Self::OUT, vec![0.0; ctx.block_size])
    }
}

/// Sine oscillator with per-sample frequency tracking.
#[derive(Debug, Default)]
pub struct SineNode {
    /// Phase in radians, `[0, 2π)`.
    phase: f64,
}

const SINE: NodeDescriptor = NodeDescriptor {
    type_name: "SineNode",
    inputs: &[PortSpec::stream("frequency")],
    outputs: &[PortSpec::stream("out")],
};

impl SineNode {
    /// Creates a sine oscillator at phase zero.
    pub fn new() -> Self {
        Self::default()
    }

    const FREQUENCY: usize = 0;
    const OUT: usize = 0;
}

impl Node for SineNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &SINE
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let frequency = ports.read_stream(Self::FREQUENCY, 0.0)?;
        let sample_rate = f64::from(ctx.sample_rate);

        let mut out = vec![0.0f32; ctx.block_size];
        for (sample, &freq) in out.iter_mut().zip(frequency.iter()) {
            *sample = self.phase.sin() as f32;
            self.phase += TAU * f64::from(freq) / sample_rate;
            self.phase %= TAU;
        }
        ports.write_stream(Self::OUT, out)
    }
}

/// Square / pulse oscillator with a pulse-width input.
#[derive(Debug, Default)]
pub struct SquareNode {
    /// Phase in cycles, `[0, 1)`.
    phase: f64,
}

const SQUARE: NodeDescriptor = NodeDescriptor {
    type_name: "SquareNode",
    inputs: &[PortSpec::stream("frequency"), PortSpec::stream("pwm")],
    outputs: &[PortSpec::stream("out")],
};

impl SquareNode {
    /// Creates a square oscillator at phase zero.
    pub fn new() -> Self {
        Self::default()
    }

    const FREQUENCY: usize = 0;
    const PWM: usize = 1;
    const OUT: usize = 0;
}

impl Node for SquareNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &SQUARE
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let frequency = ports.read_stream(Self::FREQUENCY, 0.0)?;
        let pwm = ports.read_stream(Self::PWM, 0.5)?;
        let sample_rate = f64::from(ctx.sample_rate);

        let mut out = vec![0.0f32; ctx.block_size];
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = if self.phase > f64::from(pwm[i]) { 1.0 } else { -1.0 };
            self.phase = (self.phase + f64::from(frequency[i]) / sample_rate).rem_euclid(1.0);
        }
        ports.write_stream(Self::OUT, out)
    }
}

/// Rising-ramp oscillator; output is the raw phase in `[0, 1)`.
#[derive(Debug, Default)]
pub struct SawtoothNode {
    /// Phase in cycles, `[0, 1)`.
    phase: f64,
}

const SAWTOOTH: NodeDescriptor = NodeDescriptor {
    type_name: "SawtoothNode",
    inputs: &[PortSpec::stream("frequency")],
    outputs: &[PortSpec::stream("out")],
};

impl SawtoothNode {
    /// Creates a sawtooth oscillator at phase zero.
    pub fn new() -> Self {
        Self::default()
    }

    const FREQUENCY: usize = 0;
    const OUT: usize = 0;
}

impl Node for SawtoothNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &SAWTOOTH
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let frequency = ports.read_stream(Self::FREQUENCY, 0.0)?;
        let sample_rate = f64::from(ctx.sample_rate);

        let mut out = vec![0.0f32; ctx.block_size];
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = self.phase as f32;
            self.phase = (self.phase + f64::from(frequency[i]) / sample_rate).rem_euclid(1.0);
        }
        ports.write_stream(Self::OUT, out)
    }
}

/// Stereo sink feeding the system audio device.
///
/// Owns an output stream and its block queue. Each tick the left and right
/// inputs are interleaved into one stereo block and offered to the queue;
/// the device callback drains it and the graph's barrier waits for the
/// acknowledgment, which is what paces the render loop to real time.
pub struct PlaybackNode {
    output: AudioOutput,
    queue: Arc<BlockQueue>,
    registry: Arc<QueueRegistry>,
}

const PLAYBACK: NodeDescriptor = NodeDescriptor {
    type_name: "PlaybackNode",
    inputs: &[PortSpec::stream("left"), PortSpec::stream("right")],
    outputs: &[],
};

impl PlaybackNode {
    /// Opens the default output device at the graph's session parameters and
    /// registers the block queue for the per-tick barrier.
    pub fn new(graph: &Graph) -> Result<Self> {
        let output =
            AudioOutput::open(graph.sample_rate(), graph.block_size()).map_err(device_error)?;
        let queue = output.queue();
        let registry = graph.queue_registry();
        registry.register(Arc::clone(&queue));
        Ok(Self {
            output,
            queue,
            registry,
        })
    }

    /// Number of device callbacks that found no block ready.
    pub fn underruns(&self) -> u64 {
        self.output.underruns()
    }

    const LEFT: usize = 0;
    const RIGHT: usize = 1;
}

impl Node for PlaybackNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &PLAYBACK
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let left = ports.read_stream(Self::LEFT, 0.0)?;
        let right = ports.read_stream(Self::RIGHT, 0.0)?;

        let mut stereo = vec![0.0f32; 2 * ctx.block_size];
        for i in 0..ctx.block_size {
            stereo[2 * i] = left[i];
            stereo[2 * i + 1] = right[i];
        }
        self.queue.try_push(stereo)
    }

    fn exports(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([(
            "Device".to_owned(),
            Value::Str(self.output.device_name().to_owned()),
        )])
    }

    fn teardown(&mut self) {
        self.registry.unregister(&self.queue);
        self.output.close();
    }
}

/// Mono WAV recorder.
///
/// Appends the `signal` input to a 32-bit float WAV file every tick; the
/// file is finalized on teardown. The `path` data input exists so patches
/// can wire and inspect the destination; the file itself is opened at
/// construction.
pub struct WavFileNode {
    sink: WavSink,
}

const WAV_FILE: NodeDescriptor = NodeDescriptor {
    type_name: "WavFileNode",
    inputs: &[PortSpec::data("path"), PortSpec::stream("signal")],
    outputs: &[],
};

impl WavFileNode {
    /// Path used when none is given.
    pub const DEFAULT_PATH: &'static str = "output.wav";

    /// Records to [`DEFAULT_PATH`](Self::DEFAULT_PATH).
    pub fn new(graph: &Graph) -> Result<Self> {
        Self::with_path(graph, Self::DEFAULT_PATH)
    }

    /// Records to the given path at the graph's sample rate.
    pub fn with_path(graph: &Graph, path: impl AsRef<Path>) -> Result<Self> {
        let sink = WavSink::create(path, graph.sample_rate()).map_err(device_error)?;
        Ok(Self { sink })
    }

    const SIGNAL: usize = 1;
}

impl Node for WavFileNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &WAV_FILE
    }

    fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let signal = ports.read_stream(Self::SIGNAL, 0.0)?;
        self.sink.write_block(&signal).map_err(device_error)
    }

    fn exports(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([(
            "File Path".to_owned(),
            Value::Str(self.sink.path().display().to_string()),
        )])
    }

    fn teardown(&mut self) {
        if let Err(error) = self.sink.finalize() {
            tracing::error!(%error, "failed to finalize wav file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataNode, StreamNode};
    use crate::testutil::{StreamFeed, stream_output, wire};

    const SR: u32 = 44100;
    const B: usize = 256;

    fn graph() -> Graph {
        Graph::new(SR, B)
    }

    #[test]
    fn test_silence_writes_zeros() {
        let mut g = graph();
        g.add_node("s", Box::new(SilenceNode::new())).unwrap();
        g.render_tick();

        let out = stream_output(&g, "s", "out");
        assert_eq!(out.len(), B);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_sine_matches_reference() {
        let mut g = graph();
        g.add_node("freq", Box::new(DataNode::new(440.0))).unwrap();
        g.add_node("bcast", Box::new(StreamNode::new())).unwrap();
        g.add_node("osc", Box::new(SineNode::new())).unwrap();
        wire(&mut g, ("freq", "out"), ("bcast", "data"));
        wire(&mut g, ("bcast", "out"), ("osc", "frequency"));

        let mut rendered = Vec::new();
        for _ in 0..2 {
            g.render_tick();
            rendered.extend_from_slice(&stream_output(&g, "osc", "out"));
        }

        for (i, &sample) in rendered.iter().enumerate() {
            let expected = (TAU * 440.0 * i as f64 / f64::from(SR)).sin() as f32;
            assert!(
                (sample - expected).abs() < 1e-6,
                "sample {i}: got {sample}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_sine_phase_continuity_across_blocks() {
        let mut g = graph();
        g.add_node("freq", Box::new(DataNode::new(440.0))).unwrap();
        g.add_node("bcast", Box::new(StreamNode::new())).unwrap();
        g.add_node("osc", Box::new(SineNode::new())).unwrap();
        wire(&mut g, ("freq", "out"), ("bcast", "data"));
        wire(&mut g, ("bcast", "out"), ("osc", "frequency"));

        g.render_tick();
        let first: Vec<f32> = stream_output(&g, "osc", "out").to_vec();
        g.render_tick();
        let second: Vec<f32> = stream_output(&g, "osc", "out").to_vec();

        // A phase reset at the boundary would jump by up to 2.0; a continuous
        // sine never moves more than one per-sample phase step.
        let max_step = (TAU * 440.0 / f64::from(SR)) as f32;
        let boundary_step = (second[0] - first[B - 1]).abs();
        assert!(
            boundary_step <= max_step + 1e-4,
            "boundary step {boundary_step} exceeds per-sample step {max_step}"
        );

        // And the first sample of the second block sits exactly where the
        // reference sine says it should.
        let expected = (TAU * 440.0 * B as f64 / f64::from(SR)).sin() as f32;
        assert!((second[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_unconnected_frequency_holds_at_zero() {
        let mut g = graph();
        g.add_node("osc", Box::new(SineNode::new())).unwrap();
        g.render_tick();

        // 0 Hz: phase never advances, output is sin(0) everywhere.
        let out = stream_output(&g, "osc", "out");
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_square_duty_cycle_follows_pwm() {
        let mut g = graph();
        g.add_node("freq", Box::new(StreamFeed(vec![SR as f32 / B as f32; B])))
            .unwrap();
        g.add_node("osc", Box::new(SquareNode::new())).unwrap();
        wire(&mut g, ("freq", "out"), ("osc", "frequency"));

        // One full cycle per block: sample i sees phase i/B, which exceeds
        // the default pwm of 0.5 for i in 129..256.
        g.render_tick();
        let out = stream_output(&g, "osc", "out");
        let high = out.iter().filter(|&&v| v > 0.0).count();
        assert_eq!(high, B / 2 - 1);
        assert!(out.iter().all(|&v| v == 1.0 || v == -1.0));
    }

    #[test]
    fn test_square_pwm_input_shifts_duty() {
        let mut g = graph();
        g.add_node("freq", Box::new(StreamFeed(vec![SR as f32 / B as f32; B])))
            .unwrap();
        g.add_node("pwm", Box::new(StreamFeed(vec![0.25; B]))).unwrap();
        g.add_node("osc", Box::new(SquareNode::new())).unwrap();
        wire(&mut g, ("freq", "out"), ("osc", "frequency"));
        wire(&mut g, ("pwm", "out"), ("osc", "pwm"));

        g.render_tick();
        let out = stream_output(&g, "osc", "out");
        let high = out.iter().filter(|&&v| v > 0.0).count();
        // Phase i/B exceeds 0.25 for i in 65..256.
        assert_eq!(high, (3 * B) / 4 - 1);
    }

    #[test]
    fn test_sawtooth_ramps_through_phase() {
        let mut g = graph();
        g.add_node("freq", Box::new(StreamFeed(vec![SR as f32 / B as f32; B])))
            .unwrap();
        g.add_node("osc", Box::new(SawtoothNode::new())).unwrap();
        wire(&mut g, ("freq", "out"), ("osc", "frequency"));

        g.render_tick();
        let out = stream_output(&g, "osc", "out");
        for (i, &sample) in out.iter().enumerate() {
            let expected = i as f32 / B as f32;
            assert!((sample - expected).abs() < 1e-5, "sample {i}");
        }
    }

    #[test]
    fn test_wav_file_node_records_signal() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let mut g = graph();
        g.add_node("one", Box::new(StreamFeed(vec![0.5; B]))).unwrap();
        let wav = WavFileNode::with_path(&g, &path).unwrap();
        assert_eq!(
            wav.exports().get("File Path"),
            Some(&Value::Str(path.display().to_string()))
        );
        g.add_node("rec", Box::new(wav)).unwrap();
        wire(&mut g, ("one", "out"), ("rec", "signal"));

        g.render_tick();
        g.render_tick();
        g.remove_node("rec").unwrap(); // finalizes via teardown

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, SR);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 2 * B);
        assert!(samples.iter().all(|&v| (v - 0.5).abs() < 1e-7));
    }

    #[test]
    fn test_playback_node_smoke() {
        // Needs real hardware; skip quietly when the machine has none.
        let mut g = graph();
        let Ok(node) = PlaybackNode::new(&g) else {
            return;
        };
        let exports = node.exports();
        assert!(matches!(exports.get("Device"), Some(Value::Str(_))));
        g.add_node("out", Box::new(node)).unwrap();
        g.add_node("quiet", Box::new(SilenceNode::new())).unwrap();
        wire(&mut g, ("quiet", "out"), ("out", "left"));
        wire(&mut g, ("quiet", "out"), ("out", "right"));

        // The device callback drains the queue, releasing the barrier.
        g.render_tick();
        assert_eq!(g.global_clock(), 1);
        g.remove_node("out").unwrap();
    }
}
