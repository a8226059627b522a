//! salsify-receiver: reassemble fragments from UDP, decode against the
//! state cache, ack every packet, and hand display rasters to a sink
//! thread.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use salsify_codec::references::SharedRaster;
use salsify_codec::Decoder;
use salsify_controller::DecoderStateCache;
use salsify_core::RasterPool;
use salsify_formats::Y4mWriter;
use salsify_transport::{
    Ack, AverageInterPacketDelay, Fragment, ReassembledFrame, Reassembler, ReassemblyEvent,
};
use tracing::{debug, info, warn};

/// Salsify receiver: decode a salsify stream and emit raw video.
#[derive(Parser, Debug)]
#[command(name = "salsify-receiver")]
#[command(about = "Receive, decode and display a salsify stream", long_about = None)]
#[command(version)]
struct Cli {
    /// UDP port to listen on
    port: u16,

    /// Frame width in pixels
    width: u16,

    /// Frame height in pixels
    height: u16,

    /// Fullscreen display (meaningful only with an attached display)
    #[arg(short, long)]
    fullscreen: bool,

    /// Periodic status reports on stderr
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    salsify_cli::init_logging(if cli.verbose { 2 } else { 0 });

    if cli.fullscreen {
        warn!("display is an external collaborator; writing Y4M to stdout instead");
    }

    let socket = UdpSocket::bind(("0.0.0.0", cli.port))
        .with_context(|| format!("binding port {}", cli.port))?;
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    info!(port = cli.port, width = cli.width, height = cli.height, "receiver listening");

    let pool = RasterPool::new(cli.width, cli.height);
    let mut decoder = Decoder::new(cli.width, cli.height, &pool)?;
    let initial_state = decoder.minihash();
    let mut cache = DecoderStateCache::new(decoder.clone());
    let mut current_state = initial_state;

    let mut reassembler = Reassembler::new();
    let mut avg_delay = AverageInterPacketDelay::new();

    // display sink: an unbounded queue so the decode path never blocks
    let (display_tx, display_rx) = unbounded::<SharedRaster>();
    let display_width = cli.width;
    let display_height = cli.height;
    std::thread::Builder::new()
        .name("display".into())
        .spawn(move || {
            let stdout = std::io::stdout();
            let mut sink = Y4mWriter::new(stdout.lock(), display_width, display_height, (30, 1));
            for raster in display_rx.iter() {
                if let Err(error) = sink.write_raster(&raster) {
                    warn!(%error, "display sink failed; dropping frames");
                    break;
                }
            }
        })
        .context("spawning display thread")?;

    let epoch = Instant::now();
    let mut connection_id: Option<u16> = None;
    let mut buffer = [0u8; 2048];
    let mut next_status = Instant::now();

    loop {
        let length = match socket.recv_from(&mut buffer) {
            Ok((length, peer)) => {
                socket.connect(peer).ok();
                length
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e).context("socket recv"),
        };

        let fragment = match Fragment::parse(&buffer[..length]) {
            Ok(fragment) => fragment,
            Err(error) => {
                debug!(%error, "dropping malformed fragment");
                continue;
            }
        };

        // lock onto the first connection id seen
        match connection_id {
            None => {
                connection_id = Some(fragment.connection_id);
                info!(connection_id = fragment.connection_id, "session started");
            }
            Some(id) if id != fragment.connection_id => {
                debug!("ignoring fragment from another session");
                continue;
            }
            Some(_) => {}
        }

        avg_delay.add(salsify_cli::micros_since(epoch), fragment.time_since_last);
        let (ack_frame_no, ack_fragment_no) = (fragment.frame_no, fragment.fragment_no);

        if let ReassemblyEvent::Frames(frames) = reassembler.receive(fragment)? {
            for frame in frames {
                current_state = decode_one(
                    frame,
                    &mut decoder,
                    &mut cache,
                    &pool,
                    initial_state,
                    current_state,
                    &display_tx,
                );
            }
        }

        // every received packet is acknowledged
        let ack = Ack {
            connection_id: connection_id.expect("set above"),
            frame_no: ack_frame_no,
            fragment_no: ack_fragment_no,
            avg_delay_us: avg_delay.value_us(),
            current_state,
            complete_states: cache.complete_states(),
        };
        if let Err(e) = socket.send(&ack.serialize()) {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                return Err(e).context("sending ack");
            }
        }

        if cli.verbose && next_status <= Instant::now() {
            if let Some(kb) = salsify_cli::memory_usage_kb() {
                eprintln!("<mem = {kb} kB>");
            }
            next_status = Instant::now() + Duration::from_secs(5);
        }
    }
}

/// Decode one reassembled (possibly partial) frame and return the updated
/// current state.
fn decode_one(
    frame: ReassembledFrame,
    decoder: &mut Decoder,
    cache: &mut DecoderStateCache,
    pool: &RasterPool,
    initial_state: u32,
    current_state: u32,
    display_tx: &crossbeam_channel::Sender<SharedRaster>,
) -> u32 {
    // line up the decoder with the frame's declared source
    if current_state != frame.source_minihash {
        match cache.get(frame.source_minihash) {
            Some(cached) => {
                debug!(
                    source = format_args!("{:08x}", frame.source_minihash),
                    "loading cached decoder state"
                );
                *decoder = cached.clone();
            }
            None => {
                // cache miss: drop the frame, the next ack reveals our
                // actual state and the sender recovers
                warn!(
                    frame_no = frame.frame_no,
                    source = format_args!("{:08x}", frame.source_minihash),
                    "no decoder for source state; dropping frame"
                );
                return decoder.minihash();
            }
        }
    }

    // the sender will not reference anything older than this source
    cache.prune_older_than(frame.source_minihash);

    match decoder.decode_frame(&frame.bytes, pool) {
        Ok(raster) => {
            let new_state = decoder.minihash();
            if frame.complete && new_state == frame.target_minihash && new_state != initial_state {
                cache.insert_complete(decoder.clone());
            }
            // push and move on; the display thread never applies backpressure
            let _ = display_tx.send(raster);
            new_state
        }
        Err(error) => {
            debug!(frame_no = frame.frame_no, %error, "frame failed to decode");
            decoder.minihash()
        }
    }
}
