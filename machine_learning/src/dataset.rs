use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    num::NonZeroUsize,
    path::Path,
};

use ndarray::{Array2, ArrayView2, Axis, s};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// An in memory tabular dataset, one sample per row.
///
/// Every row holds `x_size` feature columns followed by `y_size` label columns.
#[derive(Debug, Clone)]
pub struct Dataset {
    x_size: usize,
    data: Array2<f32>,
}

impl Dataset {
    /// Creates a new `Dataset` from a matrix of rows.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if the rows are narrower than `x_size`.
    pub fn new(data: Array2<f32>, x_size: usize) -> Result<Self> {
        if data.ncols() < x_size {
            return Err(MlErr::SizeMismatch {
                what: "dataset columns",
                got: data.ncols(),
                expected: x_size,
            });
        }

        Ok(Self { x_size, data })
    }

    /// Reads a comma separated file, skipping blank lines.
    ///
    /// # Arguments
    /// * `path` - The csv file.
    /// * `x_size` - The amount of leading feature columns, the rest are labels.
    ///
    /// # Errors
    /// If the file can't be read, a value isn't a number or rows differ in width.
    pub fn load_csv(path: impl AsRef<Path>, x_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;

        let mut width = None;
        let mut values: Vec<f32> = Vec::new();
        let mut rows = 0;

        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let start = values.len();
            for value in line.split(',') {
                let value = value.trim();
                let parsed = value.parse::<f32>().map_err(|_| MlErr::Parse {
                    path: path.to_path_buf(),
                    line: i + 1,
                    value: value.to_string(),
                })?;

                values.push(parsed);
            }

            let got = values.len() - start;
            let expected = *width.get_or_insert(got);
            if got != expected {
                return Err(MlErr::RaggedRow {
                    path: path.to_path_buf(),
                    line: i + 1,
                    got,
                    expected,
                });
            }

            rows += 1;
        }

        let data = Array2::from_shape_vec((rows, width.unwrap_or(x_size)), values)?;
        Self::new(data, x_size)
    }

    /// Counts the samples of a csv file without parsing them.
    pub fn count_samples(path: impl AsRef<Path>) -> Result<usize> {
        let reader = BufReader::new(File::open(path)?);

        let mut count = 0;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                count += 1;
            }
        }

        Ok(count)
    }

    /// The amount of samples.
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn x_size(&self) -> usize {
        self.x_size
    }

    pub fn y_size(&self) -> usize {
        self.data.ncols() - self.x_size
    }

    /// Every feature row.
    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.data.slice(s![.., ..self.x_size])
    }

    /// Every label row.
    pub fn y(&self) -> ArrayView2<'_, f32> {
        self.data.slice(s![.., self.x_size..])
    }

    /// Reorders the samples uniformly at random.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.data = self.data.select(Axis(0), &order);
    }

    /// Splits the dataset in consecutive batches, the last one may be shorter.
    ///
    /// # Returns
    /// An iterator of `(x, y)` views.
    pub fn batches(
        &self,
        batch_size: NonZeroUsize,
    ) -> impl Iterator<Item = (ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
        let x_size = self.x_size;

        self.data
            .axis_chunks_iter(Axis(0), batch_size.get())
            .map(move |batch| {
                let (x, y) = batch.split_at(Axis(1), x_size);
                (x, y)
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_splits_features_and_labels() {
        let file = csv("1,2,0\n3,4,1\n\n5,6,1\n");
        let ds = Dataset::load_csv(file.path(), 2).unwrap();

        assert_eq!(ds.len(), 3);
        assert_eq!(ds.y_size(), 1);
        assert_eq!(ds.x().row(1).to_vec(), vec![3.0, 4.0]);
        assert_eq!(ds.y().column(0).to_vec(), vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let file = csv("1,2,0\n3,4\n");
        let err = Dataset::load_csv(file.path(), 2).unwrap_err();
        assert!(matches!(err, MlErr::RaggedRow { line: 2, got: 2, expected: 3, .. }));
    }

    #[test]
    fn bad_numbers_point_at_their_line() {
        let file = csv("1,2,0\n3,x,1\n");
        let err = Dataset::load_csv(file.path(), 2).unwrap_err();
        assert!(matches!(err, MlErr::Parse { line: 2, .. }));
    }

    #[test]
    fn count_skips_blank_lines() {
        let file = csv("1,0\n\n2,1\n3,1\n");
        assert_eq!(Dataset::count_samples(file.path()).unwrap(), 3);
    }

    #[test]
    fn empty_file_has_no_samples() {
        let file = csv("");
        let ds = Dataset::load_csv(file.path(), 4).unwrap();
        assert!(ds.is_empty());
        assert_eq!(Dataset::count_samples(file.path()).unwrap(), 0);
    }

    #[test]
    fn batches_cover_every_sample() {
        let data = Array2::from_shape_fn((5, 2), |(i, j)| (i * 2 + j) as f32);
        let ds = Dataset::new(data, 1).unwrap();

        let sizes: Vec<_> = ds
            .batches(NonZeroUsize::new(2).unwrap())
            .map(|(x, y)| {
                assert_eq!(x.nrows(), y.nrows());
                x.nrows()
            })
            .collect();

        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn shuffle_keeps_rows_together() {
        let data = Array2::from_shape_fn((16, 2), |(i, j)| (i * (1 + 9 * j)) as f32);
        let mut ds = Dataset::new(data, 1).unwrap();
        ds.shuffle(&mut StdRng::seed_from_u64(7));

        for (x, y) in ds.x().column(0).iter().zip(ds.y().column(0)) {
            assert_eq!(*x * 10.0, *y);
        }
    }
}
