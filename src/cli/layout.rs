use std::process;
use std::sync::Arc;

use clap::Args;

use tile_lower::layout::ownership::{enumerate_indices, ownership_map};
use tile_lower::layout::{BlockedLayout, Layout, LayoutError, SliceLayout};

#[derive(Args)]
pub struct LayoutArgs {
    /// Elements per thread, per dimension (comma separated)
    #[arg(long, value_delimiter = ',', required = true)]
    pub size_per_thread: Vec<u32>,
    /// Threads per warp, per dimension
    #[arg(long, value_delimiter = ',', required = true)]
    pub threads_per_warp: Vec<u32>,
    /// Warps per CTA, per dimension
    #[arg(long, value_delimiter = ',', required = true)]
    pub warps_per_cta: Vec<u32>,
    /// Dimension order, fastest first
    #[arg(long, value_delimiter = ',', required = true)]
    pub order: Vec<u32>,
    /// Tensor shape
    #[arg(long, value_delimiter = ',', required = true)]
    pub shape: Vec<u32>,
    /// View the layout as a slice along this dimension of the parent
    #[arg(long)]
    pub slice: Option<u32>,
    /// Only print this thread's elements
    #[arg(long)]
    pub thread: Option<u32>,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {}", message);
    process::exit(1);
}

fn format_indices(indices: &[tile_lower::index::Shape]) -> String {
    let items: Vec<String> = indices.iter().map(|idx| format!("{:?}", idx.as_slice())).collect();
    items.join(" ")
}

pub fn cmd_layout(args: LayoutArgs) {
    if args.shape.contains(&0) {
        fail(LayoutError::ZeroExtent("shape"));
    }
    let blocked = BlockedLayout::new(
        &args.size_per_thread,
        &args.threads_per_warp,
        &args.warps_per_cta,
        &args.order,
    )
    .unwrap_or_else(|e| fail(e));
    let num_warps = blocked.num_warps();
    let layout = match args.slice {
        Some(dim) => {
            let slice = SliceLayout::new(dim, Arc::new(Layout::Blocked(blocked))).unwrap_or_else(|e| fail(e));
            Layout::Slice(slice)
        }
        None => Layout::Blocked(blocked),
    };
    let per_thread = layout
        .elems_per_thread(&args.shape)
        .unwrap_or_else(|e| fail(e));

    println!("{}", layout);
    println!(
        "shape {:?}: {} elements per thread, {} warps",
        args.shape, per_thread, num_warps
    );
    match args.thread {
        Some(tid) => {
            let threads = num_warps * tile_lower::config::WARP_SIZE;
            if tid >= threads {
                fail(format!("thread {} outside a CTA of {} threads", tid, threads));
            }
            let indices = enumerate_indices(&layout, &args.shape, tid).unwrap_or_else(|e| fail(e));
            println!("thread {}: {}", tid, format_indices(&indices));
        }
        None => {
            let map = ownership_map(&layout, &args.shape, num_warps).unwrap_or_else(|e| fail(e));
            for (tid, indices) in map.iter().enumerate() {
                println!("thread {}: {}", tid, format_indices(indices));
            }
        }
    }
}
