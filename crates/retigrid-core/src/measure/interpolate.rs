use ndarray::prelude::*;
use ndarray::Zip;

/// Replaces every non-zero, non-positive sample of `work` (including `NaN`) by the value of its
/// nearest seed, where seeds are the finite samples greater than zero.
///
/// Distances are exact Euclidean pixel distances, found with a two-pass separable feature
/// transform in time linear in the array size. Ties go to the seed with the smallest
/// `(row, col)`. Zero samples are left untouched.
///
/// # Returns
/// `false` if there is no seed to interpolate from; `work` is then unchanged.
pub fn fill_missing_nearest(work: &mut Array2<f64>) -> bool {
    let is_seed = work.mapv(|v| v > 0.0);
    if !is_seed.iter().any(|&s| s) {
        return false;
    }
    let row_nearest = nearest_in_rows(is_seed.view());
    let nearest = nearest_seeds(row_nearest.view());

    let source = work.view();
    let filled = Zip::from(&source)
        .and(&nearest)
        .par_map_collect(|&v, &seed| if v != 0.0 && !(v > 0.0) { source[seed] } else { v });
    *work = filled;
    true
}

/// Column of the nearest seed in the same row, `None` for rows without seeds. Ties go left.
fn nearest_in_rows(is_seed: ArrayView2<'_, bool>) -> Array2<Option<usize>> {
    let mut out = Array2::<Option<usize>>::from_elem(is_seed.dim(), None);
    Zip::from(out.rows_mut())
        .and(is_seed.rows())
        .par_for_each(|mut out, seeds| {
            let mut last = None;
            for c in 0..seeds.len() {
                if seeds[c] {
                    last = Some(c);
                }
                out[c] = last;
            }
            let mut next = None;
            for c in (0..seeds.len()).rev() {
                if seeds[c] {
                    next = Some(c);
                }
                out[c] = match (out[c], next) {
                    (Some(l), Some(n)) => Some(if c - l <= n - c { l } else { n }),
                    (l, n) => l.or(n),
                };
            }
        });
    out
}

/// Nearest seed `(row, col)` of every pixel, given each row's nearest seed column.
///
/// Each column takes the lower envelope of the parabolas `(c - col_q)² + (r - q)²` over the
/// rows `q` that hold a seed. On ties the upper parabola wins, so the smaller row is kept.
fn nearest_seeds(row_nearest: ArrayView2<'_, Option<usize>>) -> Array2<(usize, usize)> {
    let (h, w) = row_nearest.dim();
    let mut out = Array2::<(usize, usize)>::from_elem((h, w), (0, 0));
    Zip::indexed(out.columns_mut())
        .and(row_nearest.columns())
        .par_for_each(|c, mut out, nearest| {
            let cost = |q: usize, col: usize| (c.abs_diff(col).pow(2) + q * q) as f64;
            // Envelope rows with their seed column and the first row each one covers.
            let mut rows: Vec<(usize, usize)> = Vec::with_capacity(h);
            let mut starts: Vec<f64> = Vec::with_capacity(h);
            for (q, col) in nearest.iter().enumerate() {
                let Some(col) = *col else {
                    continue;
                };
                while let Some(&(p, p_col)) = rows.last() {
                    let s = (cost(q, col) - cost(p, p_col)) / (2 * (q - p)) as f64;
                    if starts.last().is_some_and(|&z| s <= z) {
                        rows.pop();
                        starts.pop();
                    } else {
                        rows.push((q, col));
                        starts.push(s);
                        break;
                    }
                }
                if rows.is_empty() {
                    rows.push((q, col));
                    starts.push(f64::NEG_INFINITY);
                }
            }

            let mut k = 0;
            for (r, slot) in out.iter_mut().enumerate() {
                while k + 1 < rows.len() && starts[k + 1] < r as f64 {
                    k += 1;
                }
                if let Some(&seed) = rows.get(k) {
                    *slot = seed;
                }
            }
        });
    out
}
