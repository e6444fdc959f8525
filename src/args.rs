use std::path::PathBuf;

/// Extracts matching ways with their surrounding nodes and ways from an
/// osm.pbf file into output.osm.pbf
#[derive(Debug, clap::Parser)]
#[clap(about, version, author)]
pub struct Args {
    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[clap(short, long, parse(from_occurrences))]
    pub verbose: u8,

    /// Input OSM pbf file
    pub input: PathBuf,
}
