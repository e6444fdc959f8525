mod args;
mod blob;
mod error;
mod matcher;
mod model;
mod osmpbf;
mod parallel;
mod passes;
mod stats;
mod strings;
mod writer;

use clap::Parser;
use colored::*;
use log::info;

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process;

use crate::error::ExtractError;
use crate::matcher::TagMatcher;
use crate::stats::Stats;

const OUTPUT_FILE: &str = "output.osm.pbf";

fn run(input: &Path, output: &Path) -> Result<Stats, ExtractError> {
    let mut file = File::open(input).map_err(ExtractError::Open)?;

    // Header-only scan; the count drives per-pass progress reporting.
    let total_blobs = blob::count_blobs(&mut file)?;
    info!("Total number of blobs: {}", total_blobs);

    info!("Pass 1/5: validating header features");
    passes::check_required_features(&mut file, total_blobs)?;
    info!("Pass 1/5: complete");

    info!("Pass 2/5: matching ways");
    let matcher = TagMatcher::golf_courses();
    let way_node_refs = passes::find_matching_ways(&mut file, &matcher, total_blobs)?;
    info!(
        "Pass 2/5: complete; {} matching ways found",
        way_node_refs.len()
    );

    info!("Pass 3/5: computing bounding boxes");
    let boxes = passes::compute_bounding_boxes(&mut file, &way_node_refs, total_blobs)?;
    let num_boxes = boxes.iter().flatten().count();
    info!("Pass 3/5: complete; {} bounding boxes established", num_boxes);

    info!("Pass 4/5: selecting nodes within bounding boxes");
    let nodes = passes::collect_nodes_in_boxes(&mut file, &boxes, total_blobs)?;
    info!("Pass 4/5: complete; {} nodes selected", nodes.len());

    info!("Pass 5/5: selecting ways using selected nodes");
    let ways = passes::collect_ways_using_nodes(&mut file, &nodes, total_blobs)?;
    info!("Pass 5/5: complete; {} ways selected", ways.len());

    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o664)
        .open(output)?;
    writer::write_header(&mut out)?;
    writer::write_nodes(&mut out, &nodes)?;
    writer::write_ways(&mut out, &ways)?;
    out.sync_all()?;

    Ok(Stats {
        num_blobs: total_blobs,
        num_matched_ways: way_node_refs.len(),
        num_boxes,
        num_nodes: nodes.len(),
        num_ways: ways.len(),
    })
}

fn main() {
    let args = args::Args::parse();
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_module_path(false)
        .format_timestamp_nanos()
        .init();

    match run(&args.input, Path::new(OUTPUT_FILE)) {
        Ok(stats) => println!("{stats}"),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blob;
    use byteorder::{NetworkEndian, WriteBytesExt};
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use prost::Message;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;

    fn supported_header() -> osmpbf::HeaderBlock {
        osmpbf::HeaderBlock {
            required_features: vec!["OsmSchema-V0.6".into(), "DenseNodes".into()],
            ..Default::default()
        }
    }

    fn stringtable(strings: &[&str]) -> osmpbf::StringTable {
        osmpbf::StringTable {
            s: strings.iter().map(|s| s.as_bytes().to_vec()).collect(),
        }
    }

    fn read_output(path: &Path) -> (osmpbf::HeaderBlock, Vec<osmpbf::PrimitiveBlock>) {
        let buf = std::fs::read(path).unwrap();
        let mut reader = Cursor::new(buf);

        let raw = blob::next_blob(&mut reader).unwrap().unwrap();
        assert_eq!(raw.header.r#type, "OSMHeader");
        let payload = blob::decode_payload(&raw.data).unwrap();
        let header = osmpbf::HeaderBlock::decode(payload.as_slice()).unwrap();

        let mut blocks = Vec::new();
        while let Some(raw) = blob::next_blob(&mut reader).unwrap() {
            assert_eq!(raw.header.r#type, "OSMData");
            let payload = blob::decode_payload(&raw.data).unwrap();
            blocks.push(osmpbf::PrimitiveBlock::decode(payload.as_slice()).unwrap());
        }
        (header, blocks)
    }

    #[test]
    fn test_empty_file_extracts_nothing() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.osm.pbf");
        let output = dir.path().join("output.osm.pbf");

        let mut file = File::create(&input).unwrap();
        blob::write_frame(&mut file, &supported_header(), "OSMHeader").unwrap();

        let stats = run(&input, &output).unwrap();
        assert_eq!(stats.num_blobs, 1);
        assert_eq!(stats.num_nodes, 0);
        assert_eq!(stats.num_ways, 0);

        let (header, blocks) = read_output(&output);
        assert_eq!(header.required_features, vec!["OsmSchema-V0.6"]);
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_single_golf_course_roundtrip() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.osm.pbf");
        let output = dir.path().join("output.osm.pbf");

        // N1(0,0), N2(1,0), N3(1,1); W1 = leisure=golf_course over all three
        let raw_deg = 10_000_000; // 1 degree at granularity 100
        let block = osmpbf::PrimitiveBlock {
            stringtable: stringtable(&["", "leisure", "golf_course", "name", "Old Course"]),
            primitivegroup: vec![osmpbf::PrimitiveGroup {
                nodes: vec![
                    osmpbf::Node {
                        id: 1,
                        lon: 0,
                        lat: 0,
                        ..Default::default()
                    },
                    osmpbf::Node {
                        id: 2,
                        lon: raw_deg,
                        lat: 0,
                        ..Default::default()
                    },
                    osmpbf::Node {
                        id: 3,
                        lon: raw_deg,
                        lat: raw_deg,
                        ..Default::default()
                    },
                ],
                ways: vec![osmpbf::Way {
                    id: 10,
                    keys: vec![1, 3],
                    vals: vec![2, 4],
                    refs: vec![1, 1, 1],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };

        let mut file = File::create(&input).unwrap();
        blob::write_frame(&mut file, &supported_header(), "OSMHeader").unwrap();
        blob::write_frame(&mut file, &block, "OSMData").unwrap();

        let stats = run(&input, &output).unwrap();
        assert_eq!(stats.num_matched_ways, 1);
        assert_eq!(stats.num_boxes, 1);
        assert_eq!(stats.num_nodes, 3);
        assert_eq!(stats.num_ways, 1);

        let (_, blocks) = read_output(&output);
        assert_eq!(blocks.len(), 2);

        let node_block = &blocks[0];
        let mut out_nodes = node_block.primitivegroup[0].nodes.clone();
        out_nodes.sort_by_key(|node| node.id);
        assert_eq!(
            out_nodes.iter().map(|node| node.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        let (lon, lat) = node_block.to_degrees(out_nodes[2].lon, out_nodes[2].lat);
        assert!((lon - 1.0).abs() < 1e-7);
        assert!((lat - 1.0).abs() < 1e-7);

        let way_block = &blocks[1];
        let out_way = &way_block.primitivegroup[0].ways[0];
        assert_eq!(out_way.id, 10);
        let mut prev = 0;
        let refs: Vec<i64> = out_way
            .refs
            .iter()
            .map(|d| {
                prev += d;
                prev
            })
            .collect();
        assert_eq!(refs, vec![1, 2, 3]);
        let tags: Vec<(String, String)> = out_way
            .keys
            .iter()
            .zip(&out_way.vals)
            .map(|(&k, &v)| {
                (
                    String::from_utf8(way_block.stringtable.s[k as usize].clone()).unwrap(),
                    String::from_utf8(way_block.stringtable.s[v as usize].clone()).unwrap(),
                )
            })
            .collect();
        assert!(tags.contains(&("leisure".to_string(), "golf_course".to_string())));
        assert!(tags.contains(&("name".to_string(), "Old Course".to_string())));
        assert!(out_way.keys.iter().chain(&out_way.vals).all(|&idx| idx >= 1));
    }

    #[test]
    fn test_unsupported_required_feature_exits_5() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.osm.pbf");

        let header = osmpbf::HeaderBlock {
            required_features: vec!["HistoricalInformation".into()],
            ..Default::default()
        };
        let mut file = File::create(&input).unwrap();
        blob::write_frame(&mut file, &header, "OSMHeader").unwrap();

        let err = run(&input, &dir.path().join("out.osm.pbf")).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_zlib_data_blob_without_raw_size_exits_6() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.osm.pbf");

        let mut file = File::create(&input).unwrap();
        blob::write_frame(&mut file, &supported_header(), "OSMHeader").unwrap();

        // hand-rolled frame: zlib payload without the mandatory raw_size
        let content = osmpbf::PrimitiveBlock {
            stringtable: stringtable(&[""]),
            ..Default::default()
        }
        .encode_to_vec();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&content).unwrap();
        let bad_blob = osmpbf::Blob {
            zlib_data: Some(encoder.finish().unwrap()),
            ..Default::default()
        };
        let blob_bytes = bad_blob.encode_to_vec();
        let blob_header = osmpbf::BlobHeader {
            r#type: "OSMData".to_string(),
            indexdata: None,
            datasize: blob_bytes.len() as i32,
        };
        let header_bytes = blob_header.encode_to_vec();
        file.write_i32::<NetworkEndian>(header_bytes.len() as i32)
            .unwrap();
        file.write_all(&header_bytes).unwrap();
        file.write_all(&blob_bytes).unwrap();

        let err = run(&input, &dir.path().join("out.osm.pbf")).unwrap_err();
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_missing_input_exits_1() {
        let dir = tempdir().unwrap();
        let err = run(
            &dir.path().join("does-not-exist.osm.pbf"),
            &dir.path().join("out.osm.pbf"),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
