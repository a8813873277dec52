// A small row-major table of measurements: one row per experiment run, one column per operation.
// Column statistics reduce the runs to a mean and a (population) standard deviation per operation.

use anyhow::{bail, Result};
use itertools::Itertools;
use std::io;

#[derive(Debug, Clone)]
pub struct Series2D {
    data: Vec<Vec<f64>>,
}

impl Series2D {
    pub fn new(rows: usize) -> Series2D {
        Series2D {
            data: vec![vec![]; rows],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.data.len()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.data
    }

    pub fn append_to_row(&mut self, row: usize, item: f64) -> Result<()> {
        match self.data.get_mut(row) {
            Some(r) => {
                r.push(item);
                Ok(())
            }
            None => bail!("Row {row} out of range, the series has {} rows", self.data.len()),
        }
    }

    // Every row must have the same, nonzero, length.
    fn columns(&self) -> Result<Vec<Vec<f64>>> {
        let width = match self.data.first() {
            Some(r) if !r.is_empty() => r.len(),
            _ => bail!("No data in series"),
        };
        if let Some(r) = self.data.iter().position(|r| r.len() != width) {
            bail!(
                "Ragged series: row {r} has {} values, row 0 has {width}",
                self.data[r].len()
            );
        }
        Ok((0..width)
            .map(|c| self.data.iter().map(|r| r[c]).collect())
            .collect())
    }

    /// Column means.

    pub fn means(&self) -> Result<Vec<f64>> {
        Ok(self
            .columns()?
            .iter()
            .map(|col| statistical::mean(col))
            .collect())
    }

    /// Column population standard deviations; a single run has a deviation of zero.

    pub fn stds(&self) -> Result<Vec<f64>> {
        Ok(self
            .columns()?
            .iter()
            .map(|col| match col.len() {
                1 => 0.0,
                _ => statistical::population_standard_deviation(col, None),
            })
            .collect())
    }

    pub fn dump(&self, out: &mut dyn io::Write) -> Result<()> {
        writeln!(out, "DATA: ")?;
        for row in &self.data {
            writeln!(out, "  [{}]", row.iter().map(|x| format!("{x:.6}")).join(", "))?;
        }
        writeln!(out, "MEANS: ")?;
        writeln!(out, "  [{}]", self.means()?.iter().map(|x| format!("{x:.6}")).join(", "))?;
        writeln!(out, "STD: ")?;
        writeln!(out, "  [{}]", self.stds()?.iter().map(|x| format!("{x:.6}")).join(", "))?;
        Ok(())
    }
}

#[test]
fn test_series2d() {
    let mut s = Series2D::new(2);
    s.append_to_row(0, 1.0).unwrap();
    s.append_to_row(0, 10.0).unwrap();
    s.append_to_row(1, 3.0).unwrap();
    s.append_to_row(1, 10.0).unwrap();
    assert!(s.means().unwrap() == vec![2.0, 10.0]);
    assert!(s.stds().unwrap() == vec![1.0, 0.0]);
    assert!(s.append_to_row(2, 0.0).is_err());
}

#[test]
fn test_series2d_single_run() {
    let mut s = Series2D::new(1);
    s.append_to_row(0, 4.0).unwrap();
    assert!(s.means().unwrap() == vec![4.0]);
    assert!(s.stds().unwrap() == vec![0.0]);
}

#[test]
fn test_series2d_errors() {
    let s = Series2D::new(2);
    assert!(s.means().is_err());

    let mut s = Series2D::new(2);
    s.append_to_row(0, 1.0).unwrap();
    s.append_to_row(0, 2.0).unwrap();
    s.append_to_row(1, 1.0).unwrap();
    assert!(s.stds().is_err());
}

#[test]
fn test_series2d_dump() {
    let mut s = Series2D::new(1);
    s.append_to_row(0, 1.5).unwrap();
    let mut out = vec![];
    s.dump(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text == "DATA: \n  [1.500000]\nMEANS: \n  [1.500000]\nSTD: \n  [0.000000]\n");
}
