//! Synthetic exercise of the picture cache: submits generated bitmaps,
//! draws them at several sizes and prints what the cache did.

use std::fs::File;

use anyhow::Result;
use clap::Parser;
use log::info;
use pixcache::{PictureCache, Rect};
use simplelog::{Config, LevelFilter, WriteLogger};

#[derive(Parser)]
#[command(name = "pixcache-demo", about = "Exercise the picture cache")]
struct Args {
    /// Maximum number of derived sizes retained per logical image.
    #[arg(long, default_value_t = 4)]
    max_resized: usize,

    /// Log at debug level instead of info.
    #[arg(short, long)]
    verbose: bool,
}

/// Diagonal gradient with full alpha; distinct per (width, height, seed).
fn gradient(width: u32, height: u32, seed: u32) -> Vec<u32> {
    let mut pixels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) & 0xff;
            let g = (y * 255 / height.max(1)) & 0xff;
            let b = (x + y + seed) & 0xff;
            pixels.push(0xff00_0000 | (b << 16) | (g << 8) | r);
        }
    }
    pixels
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(level, Config::default(), File::create("pixcache-demo.log")?)?;

    info!("starting with max_resized = {}", args.max_resized);
    let cache = PictureCache::new(args.max_resized);

    // One logical image submitted twice under two names: dedup keeps one set.
    let button = cache.fetch_by_data(64, 64, &gradient(64, 64, 1));
    cache.register_name(&button, "button-active");
    let same = cache.fetch_by_data(64, 64, &gradient(64, 64, 1));
    cache.register_name(&same, "button-default");
    println!(
        "dedup: {} set(s) for two submissions, shared = {}",
        cache.len_sets(),
        button.same_set(&same)
    );

    // Draw at several sizes; each miss resamples and caches until the bound.
    let mut target = vec![0u32; 128 * 128];
    for size in [48u32, 32, 24, 16, 48] {
        button.draw(&mut target, 128, 128, Rect::new(0, 0, size, size), 255);
        println!(
            "draw {size:>2}x{size:<2} -> resized cached: {:?}",
            button.resized_sizes()
        );
    }

    let stats = button.set_stats();
    println!(
        "final set: {} name(s), {} original(s), {} resized, {} holder(s)",
        stats.names, stats.originals, stats.resized, stats.holders
    );

    drop(same);
    drop(button);
    info!("all handles released, {} set(s) remain", cache.len_sets());
    Ok(())
}
