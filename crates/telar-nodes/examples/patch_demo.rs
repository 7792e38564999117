//! Minimal live patch: a 440 Hz sine on the default output device.
//!
//! ```sh
//! cargo run -p telar-nodes --example patch_demo
//! ```
//!
//! Set `RUST_LOG=debug` to watch the graph mutations and stream lifecycle.

use std::time::Duration;

use telar_core::Engine;
use telar_nodes::{DataNode, PlaybackNode, SineNode, StreamNode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut engine = Engine::new(44100, 256);

    engine.with_graph(|graph| -> telar_core::Result<()> {
        graph.add_node("freq", Box::new(DataNode::new(440.0)))?;
        graph.add_node("bcast", Box::new(StreamNode::new()))?;
        graph.add_node("osc", Box::new(SineNode::new()))?;
        let playback = PlaybackNode::new(graph)?;
        graph.add_node("out", Box::new(playback))?;

        graph.add_connection(
            graph.output_ref("freq", "out")?,
            graph.input_ref("bcast", "data")?,
        )?;
        graph.add_connection(
            graph.output_ref("bcast", "out")?,
            graph.input_ref("osc", "frequency")?,
        )?;
        graph.add_connection(
            graph.output_ref("osc", "out")?,
            graph.input_ref("out", "left")?,
        )?;
        graph.add_connection(
            graph.output_ref("osc", "out")?,
            graph.input_ref("out", "right")?,
        )?;
        Ok(())
    })?;

    println!("{}", serde_json::to_string_pretty(&engine.as_json())?);

    engine.start_rendering()?;
    std::thread::sleep(Duration::from_secs(2));
    engine.shutdown();

    Ok(())
}
