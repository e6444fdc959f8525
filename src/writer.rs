//! Output stages: one header block, then the selected nodes and ways in
//! classic encoding, at most 8000 entities per block, each block with
//! its own deduplicated string table.

use itertools::Itertools;

use std::io::Write;

use crate::blob::write_frame;
use crate::error::ExtractError;
use crate::model::{Node, Way};
use crate::osmpbf;
use crate::strings::StringTableBuilder;

pub const MAX_ENTITIES_PER_BLOCK: usize = 8000;

const WRITING_PROGRAM: &str = "osmextract";

/// Degrees to raw units at granularity 100 and zero offsets, truncating
/// toward zero.
fn to_raw(degrees: f64) -> i64 {
    (degrees / 1e-9) as i64 / 100
}

pub fn write_header(out: &mut impl Write) -> Result<(), ExtractError> {
    let header = osmpbf::HeaderBlock {
        required_features: vec!["OsmSchema-V0.6".to_string()],
        writingprogram: Some(WRITING_PROGRAM.to_string()),
        ..Default::default()
    };
    write_frame(out, &header, "OSMHeader")
}

pub fn write_nodes(out: &mut impl Write, nodes: &[Node]) -> Result<(), ExtractError> {
    for chunk in &nodes.iter().chunks(MAX_ENTITIES_PER_BLOCK) {
        let mut strings = StringTableBuilder::new();
        let pbf_nodes = chunk
            .map(|node| osmpbf::Node {
                id: node.id,
                keys: node.tags.iter().map(|(k, _)| strings.insert(k)).collect(),
                vals: node.tags.iter().map(|(_, v)| strings.insert(v)).collect(),
                info: None,
                lat: to_raw(node.lat),
                lon: to_raw(node.lon),
            })
            .collect();

        let group = osmpbf::PrimitiveGroup {
            nodes: pbf_nodes,
            ..Default::default()
        };
        write_data_block(out, strings, group)?;
    }
    Ok(())
}

pub fn write_ways(out: &mut impl Write, ways: &[Way]) -> Result<(), ExtractError> {
    for chunk in &ways.iter().chunks(MAX_ENTITIES_PER_BLOCK) {
        let mut strings = StringTableBuilder::new();
        let pbf_ways = chunk
            .map(|way| osmpbf::Way {
                id: way.id,
                keys: way.tags.iter().map(|(k, _)| strings.insert(k)).collect(),
                vals: way.tags.iter().map(|(_, v)| strings.insert(v)).collect(),
                info: None,
                refs: delta_encode(&way.node_ids),
            })
            .collect();

        let group = osmpbf::PrimitiveGroup {
            ways: pbf_ways,
            ..Default::default()
        };
        write_data_block(out, strings, group)?;
    }
    Ok(())
}

fn write_data_block(
    out: &mut impl Write,
    strings: StringTableBuilder,
    group: osmpbf::PrimitiveGroup,
) -> Result<(), ExtractError> {
    let block = osmpbf::PrimitiveBlock {
        stringtable: strings.into_string_table(),
        primitivegroup: vec![group],
        ..Default::default()
    };
    write_frame(out, &block, "OSMData")
}

/// Delta-encodes absolute node ids; the first delta is the first id.
fn delta_encode(node_ids: &[i64]) -> Vec<i64> {
    let mut prev = 0;
    node_ids
        .iter()
        .map(|&id| {
            let delta = id - prev;
            prev = id;
            delta
        })
        .collect()
}
