pub mod args;

pub use args::{Arguments, HtseqMode, Strandedness};

use clap::Parser;

pub fn parse() -> Arguments {
    Arguments::parse()
}
