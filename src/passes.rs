//! The five scans over the input file. Each pass rewinds the file and
//! feeds it through the parallel scanner with its own per-blob handler;
//! cross-pass state is accumulated by the single collector only.

use ahash::{AHashMap, AHashSet};
use prost::Message;

use std::fs::File;
use std::ops::Range;

use crate::blob::{self, RawBlob};
use crate::error::ExtractError;
use crate::matcher::WayMatcher;
use crate::model::{BoundingBox, Node, Tags, Way};
use crate::osmpbf;
use crate::parallel::parallel_scan;

/// Required features this reader understands.
const SUPPORTED_FEATURES: [&str; 2] = ["OsmSchema-V0.6", "DenseNodes"];

/// Pass 1: every `OSMHeader` blob must only require supported features.
pub fn check_required_features(file: &mut File, total_blobs: usize) -> Result<(), ExtractError> {
    parallel_scan(
        file,
        "Pass 1/5: validating headers ",
        total_blobs,
        |raw| {
            if raw.header.r#type == "OSMHeader" {
                let payload = blob::decode_payload(&raw.data).map_err(ExtractError::Header)?;
                let header = osmpbf::HeaderBlock::decode(payload.as_slice())
                    .map_err(|e| ExtractError::Header(e.into()))?;
                for feature in header.required_features {
                    if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
                        return Err(ExtractError::UnsupportedFeature(feature));
                    }
                }
            }
            Ok(Vec::<()>::new())
        },
        |_batch| {},
    )
}

/// Pass 2: collect the absolute node refs of every way accepted by
/// `matcher`. The result's indices identify the ways for the rest of
/// the run.
pub fn find_matching_ways(
    file: &mut File,
    matcher: &dyn WayMatcher,
    total_blobs: usize,
) -> Result<Vec<Vec<i64>>, ExtractError> {
    let mut way_node_refs = Vec::new();
    parallel_scan(
        file,
        "Pass 2/5: matching ways ",
        total_blobs,
        |raw| {
            let block = match decode_data_block(&raw)? {
                Some(block) => block,
                None => return Ok(Vec::new()),
            };
            let mut matched = Vec::new();
            for group in &block.primitivegroup {
                for way in &group.ways {
                    let tags = resolve_tags(&block.stringtable, &way.keys, &way.vals);
                    if matcher.matches(&tags) {
                        matched.push(absolute_refs(&way.refs));
                    }
                }
            }
            Ok(matched)
        },
        |batch| way_node_refs.extend(batch),
    )?;
    Ok(way_node_refs)
}

struct BoxUpdate {
    way_index: usize,
    lon: f64,
    lat: f64,
}

/// Pass 3: one bounding box per matched way, grown node by node. Ways
/// whose nodes never show up in the file keep a `None` box.
pub fn compute_bounding_boxes(
    file: &mut File,
    way_node_refs: &[Vec<i64>],
    total_blobs: usize,
) -> Result<Vec<Option<BoundingBox>>, ExtractError> {
    // node id -> indices of the ways referencing it; breaks the
    // way/node reference cycle with plain indices
    let mut node_owners: AHashMap<i64, Vec<usize>> = AHashMap::new();
    for (way_index, node_ids) in way_node_refs.iter().enumerate() {
        for &node_id in node_ids {
            node_owners.entry(node_id).or_default().push(way_index);
        }
    }

    let mut boxes: Vec<Option<BoundingBox>> = vec![None; way_node_refs.len()];
    parallel_scan(
        file,
        "Pass 3/5: bounding boxes ",
        total_blobs,
        |raw| {
            let block = match decode_data_block(&raw)? {
                Some(block) => block,
                None => return Ok(Vec::new()),
            };
            let mut updates = Vec::new();
            for group in &block.primitivegroup {
                for node in &group.nodes {
                    if let Some(owners) = node_owners.get(&node.id) {
                        let (lon, lat) = block.to_degrees(node.lon, node.lat);
                        updates.extend(owners.iter().map(|&way_index| BoxUpdate {
                            way_index,
                            lon,
                            lat,
                        }));
                    }
                }
                if let Some(dense) = &group.dense {
                    for node in DenseNodeIter::new(dense) {
                        if let Some(owners) = node_owners.get(&node.id) {
                            let (lon, lat) = block.to_degrees(node.raw_lon, node.raw_lat);
                            updates.extend(owners.iter().map(|&way_index| BoxUpdate {
                                way_index,
                                lon,
                                lat,
                            }));
                        }
                    }
                }
            }
            Ok(updates)
        },
        |batch| {
            for update in batch {
                match &mut boxes[update.way_index] {
                    Some(bbox) => bbox.expand(update.lon, update.lat),
                    slot => *slot = Some(BoundingBox::around(update.lon, update.lat)),
                }
            }
        },
    )?;
    Ok(boxes)
}

/// Pass 4: materialize every node lying within any bounding box.
pub fn collect_nodes_in_boxes(
    file: &mut File,
    boxes: &[Option<BoundingBox>],
    total_blobs: usize,
) -> Result<Vec<Node>, ExtractError> {
    let mut nodes = Vec::new();
    parallel_scan(
        file,
        "Pass 4/5: selecting nodes ",
        total_blobs,
        |raw| {
            let block = match decode_data_block(&raw)? {
                Some(block) => block,
                None => return Ok(Vec::new()),
            };
            let mut selected = Vec::new();
            for group in &block.primitivegroup {
                for node in &group.nodes {
                    let (lon, lat) = block.to_degrees(node.lon, node.lat);
                    if in_any_box(boxes, lon, lat) {
                        selected.push(Node {
                            id: node.id,
                            lon,
                            lat,
                            tags: resolve_tags(&block.stringtable, &node.keys, &node.vals),
                        });
                    }
                }
                if let Some(dense) = &group.dense {
                    for node in DenseNodeIter::new(dense) {
                        let (lon, lat) = block.to_degrees(node.raw_lon, node.raw_lat);
                        if in_any_box(boxes, lon, lat) {
                            selected.push(Node {
                                id: node.id,
                                lon,
                                lat,
                                tags: dense_tags(dense, &block.stringtable, node.key_vals),
                            });
                        }
                    }
                }
            }
            Ok(selected)
        },
        |batch| nodes.extend(batch),
    )?;
    Ok(nodes)
}

/// Pass 5: materialize every way referencing at least one selected node.
pub fn collect_ways_using_nodes(
    file: &mut File,
    nodes: &[Node],
    total_blobs: usize,
) -> Result<Vec<Way>, ExtractError> {
    let node_ids: AHashSet<i64> = nodes.iter().map(|node| node.id).collect();

    let mut ways = Vec::new();
    parallel_scan(
        file,
        "Pass 5/5: selecting ways ",
        total_blobs,
        |raw| {
            let block = match decode_data_block(&raw)? {
                Some(block) => block,
                None => return Ok(Vec::new()),
            };
            let mut selected = Vec::new();
            for group in &block.primitivegroup {
                for way in &group.ways {
                    let refs = absolute_refs(&way.refs);
                    if refs.iter().any(|id| node_ids.contains(id)) {
                        selected.push(Way {
                            id: way.id,
                            node_ids: refs,
                            tags: resolve_tags(&block.stringtable, &way.keys, &way.vals),
                        });
                    }
                }
            }
            Ok(selected)
        },
        |batch| ways.extend(batch),
    )?;
    Ok(ways)
}

/// Decodes an `OSMData` blob into its primitive block; `None` for other
/// blob types.
fn decode_data_block(raw: &RawBlob) -> Result<Option<osmpbf::PrimitiveBlock>, ExtractError> {
    if raw.header.r#type != "OSMData" {
        return Ok(None);
    }
    let payload = blob::decode_payload(&raw.data).map_err(ExtractError::Data)?;
    let block = osmpbf::PrimitiveBlock::decode(payload.as_slice())
        .map_err(|e| ExtractError::Data(e.into()))?;
    Ok(Some(block))
}

fn string_at(stringtable: &osmpbf::StringTable, index: usize) -> String {
    String::from_utf8_lossy(&stringtable.s[index]).into_owned()
}

fn resolve_tags(stringtable: &osmpbf::StringTable, keys: &[u32], vals: &[u32]) -> Tags {
    keys.iter()
        .zip(vals)
        .map(|(&k, &v)| (string_at(stringtable, k as usize), string_at(stringtable, v as usize)))
        .collect()
}

/// Undoes the delta encoding of way refs.
fn absolute_refs(deltas: &[i64]) -> Vec<i64> {
    let mut node_id = 0;
    deltas
        .iter()
        .map(|delta| {
            node_id += delta;
            node_id
        })
        .collect()
}

fn in_any_box(boxes: &[Option<BoundingBox>], lon: f64, lat: f64) -> bool {
    boxes
        .iter()
        .flatten()
        .any(|bbox| bbox.contains(lon, lat))
}

/// One reconstructed dense node; `key_vals` indexes the pair region of
/// the group's `keys_vals` stream (delimiter excluded).
struct DenseNode {
    id: i64,
    raw_lon: i64,
    raw_lat: i64,
    key_vals: Range<usize>,
}

/// Walks a dense node group, undoing the delta encoding of ids and
/// coordinates and carrying the `keys_vals` cursor past one `0`
/// delimiter per node. An empty `keys_vals` stream means no node in the
/// group has tags, and the cursor never moves.
struct DenseNodeIter<'a> {
    dense: &'a osmpbf::DenseNodes,
    pos: usize,
    node_id: i64,
    raw_lon: i64,
    raw_lat: i64,
    kv_cursor: usize,
}

impl<'a> DenseNodeIter<'a> {
    fn new(dense: &'a osmpbf::DenseNodes) -> Self {
        Self {
            dense,
            pos: 0,
            node_id: 0,
            raw_lon: 0,
            raw_lat: 0,
            kv_cursor: 0,
        }
    }
}

impl<'a> Iterator for DenseNodeIter<'a> {
    type Item = DenseNode;

    fn next(&mut self) -> Option<DenseNode> {
        if self.pos >= self.dense.id.len() {
            return None;
        }
        self.node_id += self.dense.id[self.pos];
        self.raw_lon += self.dense.lon[self.pos];
        self.raw_lat += self.dense.lat[self.pos];

        let kv_start = self.kv_cursor;
        let mut kv_end = kv_start;
        if !self.dense.keys_vals.is_empty() {
            while self.dense.keys_vals[kv_end] != 0 {
                kv_end += 2;
            }
            self.kv_cursor = kv_end + 1;
        }

        self.pos += 1;
        Some(DenseNode {
            id: self.node_id,
            raw_lon: self.raw_lon,
            raw_lat: self.raw_lat,
            key_vals: kv_start..kv_end,
        })
    }
}

fn dense_tags(
    dense: &osmpbf::DenseNodes,
    stringtable: &osmpbf::StringTable,
    key_vals: Range<usize>,
) -> Tags {
    key_vals
        .step_by(2)
        .map(|i| {
            (
                string_at(stringtable, dense.keys_vals[i] as usize),
                string_at(stringtable, dense.keys_vals[i + 1] as usize),
            )
        })
        .collect()
}
