use std::fmt;

/// Counters reported at the end of a run.
#[derive(Debug, Default)]
pub struct Stats {
    pub num_blobs: usize,
    pub num_matched_ways: usize,
    pub num_boxes: usize,
    pub num_nodes: usize,
    pub num_ways: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            r#"Extracted:
  blobs scanned:  {}
  matched ways:   {}
  bounding boxes: {}
  nodes written:  {}
  ways written:   {}"#,
            self.num_blobs,
            self.num_matched_ways,
            self.num_boxes,
            self.num_nodes,
            self.num_ways
        )
    }
}
