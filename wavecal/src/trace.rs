//! Spectral-trace records and interpolation on the cross-dispersion
//! axis.

/// Length limit for a trace displacement array.
pub const MAX_SP_TRACE: usize = 1024;

/// One row of the spectrum-trace table: the Y displacement of a
/// spectral order from its nominal line as a function of X.
#[derive(Clone, Debug)]
pub struct TraceRecord {
    /// Y location on the detector (reference pixels).
    pub a2center: f64,
    /// X location on the detector (reference pixels).
    pub a1center: f64,
    /// Spectral order number.
    pub sporder: i32,
    /// Displacements, one per reference-pixel column.
    pub a2displ: Vec<f64>,
}

impl TraceRecord {
    /// Rotates the trace about its centre: `y'[i] = y[i] + dx * tan(theta)`
    /// with `dx` measured from `a1center`.  The angle is in degrees.
    pub fn rotate(&mut self, degrees: f64) {
        if degrees == 0.0 {
            return;
        }
        let t = degrees.to_radians().tan();
        for (i, y) in self.a2displ.iter_mut().enumerate() {
            *y += (i as f64 - self.a1center) * t;
        }
    }
}

/// Traces for every spectral order, kept sorted ascending by
/// `a2center`.  A contiguous vector with binary search replaces the
/// forward-linked list of the original implementation.
#[derive(Clone, Debug, Default)]
pub struct TraceList {
    records: Vec<TraceRecord>,
}

impl TraceList {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record at its sorted position.  Records whose
    /// displacement array exceeds [`MAX_SP_TRACE`] are truncated.
    pub fn insert(&mut self, mut rec: TraceRecord) {
        rec.a2displ.truncate(MAX_SP_TRACE);
        let pos = self
            .records
            .partition_point(|r| r.a2center <= rec.a2center);
        self.records.insert(pos, rec);
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the list holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The records in ascending a2center order.
    #[must_use]
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    /// Rotates every trace by the same angle (degrees).
    pub fn rotate(&mut self, degrees: f64) {
        for rec in &mut self.records {
            rec.rotate(degrees);
        }
    }

    /// Returns the trace interpolated at `a2center`.
    ///
    /// Between two records the displacements are linearly interpolated
    /// element-wise over `max` of the two lengths (missing elements
    /// count as zero).  Outside the tabulated range the nearest record
    /// is copied verbatim with only its `a2center` overwritten.
    /// Returns `None` when the list is empty.
    #[must_use]
    pub fn interpolate(&self, a2center: f64) -> Option<TraceRecord> {
        let first = self.records.first()?;
        if a2center <= first.a2center {
            let mut out = first.clone();
            out.a2center = a2center;
            return Some(out);
        }
        let last = self.records.last()?;
        if a2center >= last.a2center {
            let mut out = last.clone();
            out.a2center = a2center;
            return Some(out);
        }

        // partition_point > 0 here because a2center > first.a2center
        let hi = self
            .records
            .partition_point(|r| r.a2center < a2center);
        let lo = hi - 1;
        let current = &self.records[lo];
        let next = &self.records[hi];

        let p = (a2center - current.a2center) / (next.a2center - current.a2center);
        let nelem = current.a2displ.len().max(next.a2displ.len());
        let a2displ = (0..nelem)
            .map(|i| {
                let a = current.a2displ.get(i).copied().unwrap_or(0.0);
                let b = next.a2displ.get(i).copied().unwrap_or(0.0);
                (1.0 - p) * a + p * b
            })
            .collect();

        Some(TraceRecord {
            a2center,
            a1center: current.a1center,
            sporder: current.sporder,
            a2displ,
        })
    }
}
