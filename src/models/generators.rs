//! Named micro/macro generators.

use nalgebra::DMatrix;

use crate::params::Generator;

pub const GENERATORS: [(&str, &str); 5] = [
    ("identity", "raw series unchanged"),
    ("sum", "sum over variables (1 x T)"),
    ("mean", "mean over variables (1 x T)"),
    ("cosine", "elementwise cosine, for phase series"),
    (
        "order_parameter",
        "Kuramoto order parameter |mean exp(i theta)| over variables (1 x T)",
    ),
];

pub fn generator_names() -> impl Iterator<Item = &'static str> {
    GENERATORS.iter().map(|(name, _)| *name)
}

/// Look up a built-in generator by name.
pub fn generator(name: &str) -> Option<Generator> {
    let g = match name {
        "identity" => Generator::new(name, |m: &DMatrix<f64>| m.clone()),
        "sum" => Generator::new(name, |m: &DMatrix<f64>| {
            DMatrix::from_fn(1, m.ncols(), |_, j| m.column(j).sum())
        }),
        "mean" => Generator::new(name, |m: &DMatrix<f64>| {
            let n = m.nrows().max(1) as f64;
            DMatrix::from_fn(1, m.ncols(), |_, j| m.column(j).sum() / n)
        }),
        "cosine" => Generator::new(name, |m: &DMatrix<f64>| m.map(f64::cos)),
        "order_parameter" => Generator::new(name, order_parameter),
        _ => return None,
    };
    Some(g)
}

fn order_parameter(phases: &DMatrix<f64>) -> DMatrix<f64> {
    let n = phases.nrows().max(1) as f64;
    DMatrix::from_fn(1, phases.ncols(), |_, j| {
        let column = phases.column(j);
        let re = column.iter().map(|t| t.cos()).sum::<f64>() / n;
        let im = column.iter().map(|t| t.sin()).sum::<f64>() / n;
        re.hypot(im)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves() {
        for name in generator_names() {
            let g = generator(name).unwrap();
            assert_eq!(g.name(), name);
        }
        assert!(generator("median").is_none());
    }

    #[test]
    fn order_parameter_is_one_when_synchronized() {
        let phases = DMatrix::from_row_slice(3, 2, &[0.3, 0.0, 0.3, std::f64::consts::PI, 0.3, 0.0]);
        let r = generator("order_parameter").unwrap().apply(&phases);
        assert_eq!(r.shape(), (1, 2));
        assert!((r[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((r[(0, 1)] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn mean_divides_sum_by_variables() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 6.0]);
        let mean = generator("mean").unwrap().apply(&m);
        assert_eq!(mean, DMatrix::from_row_slice(1, 2, &[2.0, 4.0]));
    }
}
