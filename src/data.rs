use faer::prelude::*;

use crate::Error;

/// `(values - mu) / sigma`, applied to every column.
pub fn normalize(values: MatRef<f64>, mu: ColRef<f64>, sigma: ColRef<f64>) -> Mat<f64> {
    Mat::from_fn(values.nrows(), values.ncols(), |i, c| {
        (values[(i, c)] - mu[i]) / sigma[i]
    })
}

/// Inverse of [`normalize`]: `values * sigma + mu`, applied to every column.
pub fn denormalize(values: MatRef<f64>, mu: ColRef<f64>, sigma: ColRef<f64>) -> Mat<f64> {
    Mat::from_fn(values.nrows(), values.ncols(), |i, c| {
        values[(i, c)] * sigma[i] + mu[i]
    })
}

/// Per-row mean and standard deviation over the batch dimension.
///
/// Rows with zero spread get a standard deviation of 1 so that normalizing a
/// constant feature is a no-op rather than a division by zero.
fn row_stats(values: MatRef<f64>) -> (Col<f64>, Col<f64>) {
    let n = values.nrows();
    let m = values.ncols();
    let mut avg = Col::zeros(n);
    let mut std = Col::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for c in 0..m {
            sum += values[(i, c)];
        }
        let mean = sum / m as f64;
        let mut var = 0.0;
        for c in 0..m {
            var += (values[(i, c)] - mean).powi(2);
        }
        let mut sd = (var / m as f64).sqrt();
        if sd == 0.0 {
            sd = 1.0;
        }
        avg[i] = mean;
        std[i] = sd;
    }
    (avg, std)
}

/// A batch of training examples.
///
/// Inputs `x` are (n_x, m), responses `y` are (n_y, m), and the optional
/// Jacobian target holds one (n_y, m) matrix per input coordinate j, i.e.
/// `partials()[j][(i, c)]` is the target for dy_i/dx_j at example c.
/// Per-row statistics are computed once at construction.
pub struct Dataset {
    x: Mat<f64>,
    y: Mat<f64>,
    j: Option<Vec<Mat<f64>>>,
    avg_x: Col<f64>,
    std_x: Col<f64>,
    avg_y: Col<f64>,
    std_y: Col<f64>,
}

impl Dataset {
    pub fn new(x: Mat<f64>, y: Mat<f64>) -> Result<Self, Error> {
        if x.ncols() != y.ncols() {
            return Err(Error::shape_mismatch(
                format!("{} response columns", x.ncols()),
                format!("{}", y.ncols()),
            ));
        }
        if x.nrows() == 0 || y.nrows() == 0 || x.ncols() == 0 {
            return Err(Error::shape_mismatch(
                "non-empty inputs and responses",
                format!("x: {}x{}, y: {}x{}", x.nrows(), x.ncols(), y.nrows(), y.ncols()),
            ));
        }
        let (avg_x, std_x) = row_stats(x.as_ref());
        let (avg_y, std_y) = row_stats(y.as_ref());
        Ok(Self {
            x,
            y,
            j: None,
            avg_x,
            std_x,
            avg_y,
            std_y,
        })
    }

    pub fn with_partials(x: Mat<f64>, y: Mat<f64>, j: Vec<Mat<f64>>) -> Result<Self, Error> {
        let (n_x, n_y, m) = (x.nrows(), y.nrows(), x.ncols());
        let mut data = Self::new(x, y)?;
        if j.len() != n_x {
            return Err(Error::shape_mismatch(
                format!("{n_x} Jacobian slices"),
                format!("{}", j.len()),
            ));
        }
        for (jdx, slice) in j.iter().enumerate() {
            if slice.nrows() != n_y || slice.ncols() != m {
                return Err(Error::shape_mismatch(
                    format!("Jacobian slice of shape {n_y}x{m}"),
                    format!("{}x{} at input {jdx}", slice.nrows(), slice.ncols()),
                ));
            }
        }
        data.j = Some(j);
        Ok(data)
    }

    pub fn m(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_x(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_y(&self) -> usize {
        self.y.nrows()
    }

    pub fn x(&self) -> MatRef<'_, f64> {
        self.x.as_ref()
    }

    pub fn y(&self) -> MatRef<'_, f64> {
        self.y.as_ref()
    }

    /// Jacobian target, one (n_y, m) matrix per input coordinate.
    pub fn partials(&self) -> Option<&[Mat<f64>]> {
        self.j.as_deref()
    }

    pub fn avg_x(&self) -> ColRef<'_, f64> {
        self.avg_x.as_ref()
    }

    pub fn std_x(&self) -> ColRef<'_, f64> {
        self.std_x.as_ref()
    }

    pub fn avg_y(&self) -> ColRef<'_, f64> {
        self.avg_y.as_ref()
    }

    pub fn std_y(&self) -> ColRef<'_, f64> {
        self.std_y.as_ref()
    }

    /// A new dataset with inputs and responses centered and scaled by this
    /// dataset's statistics, and the Jacobian target rescaled accordingly
    /// (dy'/dx' = dy/dx * sigma_x / sigma_y).
    pub fn normalize(&self) -> Dataset {
        let x = normalize(self.x.as_ref(), self.avg_x.as_ref(), self.std_x.as_ref());
        let y = normalize(self.y.as_ref(), self.avg_y.as_ref(), self.std_y.as_ref());
        let j = self.j.as_ref().map(|j| {
            j.iter()
                .enumerate()
                .map(|(jdx, slice)| {
                    Mat::from_fn(slice.nrows(), slice.ncols(), |i, c| {
                        slice[(i, c)] * self.std_x[jdx] / self.std_y[i]
                    })
                })
                .collect::<Vec<_>>()
        });
        let mut data = match j {
            Some(j) => Dataset::with_partials(x, y, j),
            None => Dataset::new(x, y),
        }
        // Shapes were already validated when self was built.
        .unwrap();
        // The normalized dataset denormalizes with the original statistics.
        data.avg_x = self.avg_x.clone();
        data.std_x = self.std_x.clone();
        data.avg_y = self.avg_y.clone();
        data.std_y = self.std_y.clone();
        data
    }
}
