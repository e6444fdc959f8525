//! Parallel blob scanner: one producer reading framed blobs from the
//! rewound input, a pool of workers decoding and filtering them, and a
//! single collector folding per-blob results into the caller's
//! accumulator. Only the collector touches shared state, so passes need
//! no locks.

use crossbeam::channel::bounded;
use pbr::ProgressBar;

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};

use crate::blob::{self, RawBlob};
use crate::error::ExtractError;

/// Scans every blob of `file` once.
///
/// `handler` runs on the workers and turns one blob into the pass's
/// records; `consume` runs on the calling thread and receives one batch
/// per blob, in no particular order between blobs. The first error from
/// the producer, a worker, or `handler` tears the pipeline down and is
/// returned.
pub fn parallel_scan<Handler, Record, Consumer>(
    file: &mut File,
    progress_message: &str,
    total_blobs: usize,
    handler: Handler,
    mut consume: Consumer,
) -> Result<(), ExtractError>
where
    Handler: Fn(RawBlob) -> Result<Vec<Record>, ExtractError> + Sync,
    Record: Send,
    Consumer: FnMut(Vec<Record>),
{
    file.seek(SeekFrom::Start(0))?;
    let num_workers = 2 * rayon::current_num_threads();

    let mut pb = ProgressBar::new(total_blobs as u64);
    pb.message(progress_message);

    let mut reader = BufReader::new(&mut *file);

    crossbeam::scope(|s| -> Result<(), ExtractError> {
        let (work_tx, work_rx) = bounded::<RawBlob>(2 * num_workers);
        let (result_tx, result_rx) =
            bounded::<Result<Vec<Record>, ExtractError>>(2 * num_workers);

        // Producer: the only thread that reads the file. A send failure
        // means the collector already gave up on an error.
        let producer_results = result_tx.clone();
        s.spawn(move |_| loop {
            match blob::next_blob(&mut reader) {
                Ok(Some(raw)) => {
                    if work_tx.send(raw).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = producer_results.send(Err(e));
                    break;
                }
            }
        });

        let handler = &handler;
        for _ in 0..num_workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move |_| {
                for raw in work_rx {
                    if result_tx.send(handler(raw)).is_err() {
                        break;
                    }
                }
            });
        }
        // Once the producer and all workers hang up, the result channel
        // disconnects and the collector loop below terminates.
        drop(work_rx);
        drop(result_tx);

        for batch in result_rx {
            consume(batch?);
            pb.inc();
        }
        pb.finish();
        Ok(())
    })
    .expect("thread panicked")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::osmpbf;
    use byteorder::{NetworkEndian, WriteBytesExt};
    use std::io::Write;

    fn file_with_blocks(count: usize) -> File {
        let mut file = tempfile::tempfile().unwrap();
        for i in 0..count {
            let block = osmpbf::HeaderBlock {
                source: Some(format!("block {}", i)),
                ..Default::default()
            };
            blob::write_frame(&mut file, &block, "OSMHeader").unwrap();
        }
        file
    }

    #[test]
    fn test_scans_every_blob() {
        let mut file = file_with_blocks(23);

        let mut seen = Vec::new();
        parallel_scan(
            &mut file,
            "scan ",
            23,
            |raw| Ok(vec![raw.header.r#type]),
            |batch| seen.extend(batch),
        )
        .unwrap();

        assert_eq!(seen.len(), 23);
        assert!(seen.iter().all(|t| t == "OSMHeader"));
    }

    #[test]
    fn test_handler_error_is_fatal() {
        let mut file = file_with_blocks(8);

        let result: Result<(), _> = parallel_scan(
            &mut file,
            "scan ",
            8,
            |_raw| -> Result<Vec<()>, ExtractError> {
                Err(ExtractError::UnsupportedFeature("nope".to_string()))
            },
            |_batch| {},
        );

        assert_eq!(result.unwrap_err().exit_code(), 5);
    }

    #[test]
    fn test_producer_error_is_fatal() {
        let mut file = tempfile::tempfile().unwrap();
        // one valid frame, then a frame with an oversized header length
        let block = osmpbf::HeaderBlock::default();
        blob::write_frame(&mut file, &block, "OSMHeader").unwrap();
        file.write_i32::<NetworkEndian>(i32::MAX).unwrap();
        file.write_all(&[0u8; 8]).unwrap();

        let result = parallel_scan(
            &mut file,
            "scan ",
            2,
            |_raw| Ok(Vec::<()>::new()),
            |_batch| {},
        );

        assert!(matches!(
            result.unwrap_err(),
            ExtractError::MalformedFrame(_)
        ));
    }
}
