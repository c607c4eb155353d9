//! Dense linear algebra helpers on top of `ndarray` and `ndarray-linalg`.
//!
//! Cartesian operator triples are stored as `(3, n, n)` arrays with the
//! component along the first axis.

use ndarray::{ self as nd, s, Axis };
use ndarray_linalg::InverseInto;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::error::{ AngmomError, AngmomResult };

/* Construction ***************************************************************/

/// Complex identity matrix.
pub fn eye(n: usize) -> nd::Array2<C64> { nd::Array2::eye(n) }

/// Kronecker product `a ⊗ b`.
pub fn kron<T>(a: &nd::Array2<T>, b: &nd::Array2<T>) -> nd::Array2<T>
where T: Clone + Zero + std::ops::Mul<Output = T>
{
    let (ar, ac) = a.dim();
    let (br, bc) = b.dim();
    let mut out: nd::Array2<T> = nd::Array2::zeros((ar * br, ac * bc));
    for ((i, j), aij) in a.indexed_iter() {
        out.slice_mut(s![i * br..(i + 1) * br, j * bc..(j + 1) * bc])
            .zip_mut_with(b, |o, bkl| { *o = aij.clone() * bkl.clone(); });
    }
    out
}

/// Kronecker product of a sequence of matrices; the empty product is the
/// `1 x 1` identity.
pub fn kron_all<'a, I>(mats: I) -> nd::Array2<C64>
where I: IntoIterator<Item = &'a nd::Array2<C64>>
{
    mats.into_iter().fold(eye(1), |acc, m| kron(&acc, m))
}

/// Place (possibly rectangular) blocks along the diagonal.
pub fn block_diag<T>(blocks: &[nd::Array2<T>]) -> nd::Array2<T>
where T: Clone + Zero
{
    let rows: usize = blocks.iter().map(|b| b.nrows()).sum();
    let cols: usize = blocks.iter().map(|b| b.ncols()).sum();
    let mut out: nd::Array2<T> = nd::Array2::zeros((rows, cols));
    let (mut r, mut c) = (0, 0);
    for b in blocks.iter() {
        let (br, bc) = b.dim();
        out.slice_mut(s![r..r + br, c..c + bc]).assign(b);
        r += br;
        c += bc;
    }
    out
}

/// [`block_diag`] for each Cartesian component.
pub fn block_diag3(blocks: &[nd::Array3<C64>]) -> nd::Array3<C64> {
    let rows: usize = blocks.iter().map(|b| b.shape()[1]).sum();
    let cols: usize = blocks.iter().map(|b| b.shape()[2]).sum();
    let mut out: nd::Array3<C64> = nd::Array3::zeros((3, rows, cols));
    let (mut r, mut c) = (0, 0);
    for b in blocks.iter() {
        let (_, br, bc) = b.dim();
        out.slice_mut(s![.., r..r + br, c..c + bc]).assign(b);
        r += br;
        c += bc;
    }
    out
}

/// Assemble a full `(3, rows, cols)` array from a grid of blocks.
pub fn from_block_grid3(grid: &[Vec<nd::Array3<C64>>]) -> AngmomResult<nd::Array3<C64>> {
    let rows: Vec<usize>
        = grid.iter()
        .map(|row| row.first().map(|b| b.shape()[1]).unwrap_or(0))
        .collect();
    let cols: Vec<usize>
        = grid.first()
        .map(|row| row.iter().map(|b| b.shape()[2]).collect())
        .unwrap_or_default();
    let mut out: nd::Array3<C64>
        = nd::Array3::zeros((3, rows.iter().sum(), cols.iter().sum()));
    let mut r = 0;
    for (row, nr) in grid.iter().zip(rows.iter()) {
        if row.len() != cols.len() {
            return Err(AngmomError::shape(&[cols.len()], &[row.len()]));
        }
        let mut c = 0;
        for (blk, nc) in row.iter().zip(cols.iter()) {
            if blk.shape() != [3, *nr, *nc] {
                return Err(AngmomError::shape(&[3, *nr, *nc], blk.shape()));
            }
            out.slice_mut(s![.., r..r + nr, c..c + nc]).assign(blk);
            c += nc;
        }
        r += nr;
    }
    Ok(out)
}

/* Transformation *************************************************************/

/// Conjugate transpose.
pub fn dagger(a: &nd::Array2<C64>) -> nd::Array2<C64> {
    a.t().mapv(|z| z.conj())
}

/// `U† O U`.
pub fn unitary_transform(op: &nd::Array2<C64>, U: &nd::Array2<C64>)
    -> nd::Array2<C64>
{
    dagger(U).dot(op).dot(U)
}

/// `U† O_c U` for each Cartesian component.
pub fn unitary_transform3(op: &nd::Array3<C64>, U: &nd::Array2<C64>)
    -> nd::Array3<C64>
{
    let Ud = dagger(U);
    let n = U.ncols();
    let mut out: nd::Array3<C64> = nd::Array3::zeros((op.shape()[0], n, n));
    for (mut o, c) in out.outer_iter_mut().zip(op.outer_iter()) {
        o.assign(&Ud.dot(&c).dot(U));
    }
    out
}

/// `U₁† O_c U₂` for each Cartesian component.
pub fn transform3_between(
    op: &nd::ArrayView3<C64>,
    U1: &nd::Array2<C64>,
    U2: &nd::Array2<C64>,
) -> nd::Array3<C64>
{
    let U1d = dagger(U1);
    let mut out: nd::Array3<C64>
        = nd::Array3::zeros((op.shape()[0], U1.ncols(), U2.ncols()));
    for (mut o, c) in out.outer_iter_mut().zip(op.outer_iter()) {
        o.assign(&U1d.dot(&c).dot(U2));
    }
    out
}

/// `(A + A†) / 2`.
pub fn hermitize(a: &nd::Array2<C64>) -> nd::Array2<C64> {
    (a + &dagger(a)).mapv(|z| z * 0.5)
}

/// Rotate the Cartesian components of an operator triple:
/// `O'_j = Σ_i R_ji O_i`.
pub fn rotate_cart(op: &nd::Array3<C64>, R: &nd::Array2<f64>) -> nd::Array3<C64> {
    let mut out: nd::Array3<C64> = nd::Array3::zeros(op.raw_dim());
    for (j, mut o) in out.outer_iter_mut().enumerate() {
        for (i, c) in op.outer_iter().enumerate() {
            o.scaled_add(C64::from(R[[j, i]]), &c);
        }
    }
    out
}

/// `Σ_c O_c O_c`.
pub fn cartesian_op_squared(op: &nd::Array3<C64>) -> nd::Array2<C64> {
    let n = op.shape()[1];
    op.outer_iter()
        .fold(nd::Array2::zeros((n, n)), |acc, c| acc + c.dot(&c))
}

/// `Σ_c v_c O_c`.
pub fn contract3(v: &[C64; 3], op: &nd::Array3<C64>) -> nd::Array2<C64> {
    let n = op.shape()[1];
    op.outer_iter().zip(v)
        .fold(nd::Array2::zeros((n, n)), |acc, (c, vc)| acc + &c.mapv(|z| z * vc))
}

/// Frobenius inner product `Σ A_ij conj(B_ij)`.
pub fn frobenius_inner(a: &nd::Array2<C64>, b: &nd::Array2<C64>) -> C64 {
    a.iter().zip(b).map(|(x, y)| x * y.conj()).sum()
}

/// Squared Frobenius norm.
pub fn frobenius_sq(a: &nd::Array2<C64>) -> f64 {
    a.iter().map(|z| z.norm_sqr()).sum()
}

/// Sub-matrix on the given row and column indices.
pub fn submatrix(op: &nd::Array2<C64>, rows: &[usize], cols: &[usize])
    -> nd::Array2<C64>
{
    op.select(Axis(0), rows).select(Axis(1), cols)
}

/// [`submatrix`] for each Cartesian component.
pub fn submatrix3(op: &nd::Array3<C64>, rows: &[usize], cols: &[usize])
    -> nd::Array3<C64>
{
    op.select(Axis(1), rows).select(Axis(2), cols)
}

/// Group indices by label, with groups ordered by ascending label and indices
/// kept in their original order within each group.
pub fn group_indices<T>(labels: &[T]) -> Vec<(T, Vec<usize>)>
where T: Copy + Ord
{
    let mut unique: Vec<T> = labels.to_vec();
    unique.sort();
    unique.dedup();
    unique.into_iter()
        .map(|u| {
            let idx: Vec<usize>
                = labels.iter().enumerate()
                .filter_map(|(k, l)| (*l == u).then_some(k))
                .collect();
            (u, idx)
        })
        .collect()
}

/// Integer matrix power by repeated squaring.
pub fn matrix_power(a: &nd::Array2<C64>, mut p: u32) -> nd::Array2<C64> {
    let mut result = eye(a.nrows());
    let mut base = a.clone();
    while p > 0 {
        if p & 1 == 1 { result = result.dot(&base); }
        p >>= 1;
        if p > 0 { base = base.dot(&base); }
    }
    result
}

/* Exponentials ***************************************************************/

const PADE13: [f64; 14] = [
    64764752532480000.0,
    32382376266240000.0,
    7771770303897600.0,
    1187353796428800.0,
    129060195264000.0,
    10559470521600.0,
    670442572800.0,
    33522128640.0,
    1323241920.0,
    40840800.0,
    960960.0,
    16380.0,
    182.0,
    1.0,
];

// 1-norm bound below which the [13/13] approximant is accurate to double
// precision
const THETA13: f64 = 5.371920351148152;

fn onenorm(a: &nd::Array2<C64>) -> f64 {
    a.columns().into_iter()
        .map(|c| c.iter().map(|z| z.norm()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Matrix exponential by scaling and squaring with a [13/13] Padé
/// approximant.
pub fn expm(a: &nd::Array2<C64>) -> AngmomResult<nd::Array2<C64>> {
    let n = a.nrows();
    if n == 0 { return Ok(a.clone()); }
    let norm = onenorm(a);
    let squarings: u32
        = if norm > THETA13 { (norm / THETA13).log2().ceil() as u32 } else { 0 };
    let scale = 2.0_f64.powi(squarings as i32);
    let A = a.mapv(|z| z / scale);
    let I = eye(n);
    let b = &PADE13;
    let A2 = A.dot(&A);
    let A4 = A2.dot(&A2);
    let A6 = A4.dot(&A2);
    let U_inner
        = A6.dot(&(&A6 * b[13] + &A4 * b[11] + &A2 * b[9]))
        + &A6 * b[7] + &A4 * b[5] + &A2 * b[3] + &I * b[1];
    let U = A.dot(&U_inner);
    let V
        = A6.dot(&(&A6 * b[12] + &A4 * b[10] + &A2 * b[8]))
        + &A6 * b[6] + &A4 * b[4] + &A2 * b[2] + &I * b[0];
    let P = &V + &U;
    let Q = V - U;
    let mut R = Q.inv_into()?.dot(&P);
    for _ in 0..squarings {
        R = R.dot(&R);
    }
    Ok(R)
}

/// Upper-right block of `exp(t [[A, B], [0, C]])`, which equals
/// `∫_0^t exp((t - s) A) B exp(s C) ds`.
pub fn block_triangular_expm(
    A: &nd::Array2<C64>,
    B: &nd::Array2<C64>,
    C: &nd::Array2<C64>,
    t: f64,
) -> AngmomResult<nd::Array2<C64>>
{
    let n = A.nrows();
    let m = C.nrows();
    if B.dim() != (n, m) {
        return Err(AngmomError::shape(&[n, m], B.shape()));
    }
    let mut big: nd::Array2<C64> = nd::Array2::zeros((n + m, n + m));
    big.slice_mut(s![..n, ..n]).assign(&A.mapv(|z| z * t));
    big.slice_mut(s![..n, n..]).assign(&B.mapv(|z| z * t));
    big.slice_mut(s![n.., n..]).assign(&C.mapv(|z| z * t));
    let E = expm(&big)?;
    Ok(E.slice(s![..n, n..]).to_owned())
}

/* Rotations ******************************************************************/

/// Rotation vector (axis times angle) of a proper rotation matrix.
pub fn rotation_vector(R: &nd::Array2<f64>) -> AngmomResult<[f64; 3]> {
    if R.dim() != (3, 3) {
        return Err(AngmomError::shape(&[3, 3], R.shape()));
    }
    let det
        = R[[0, 0]] * (R[[1, 1]] * R[[2, 2]] - R[[1, 2]] * R[[2, 1]])
        - R[[0, 1]] * (R[[1, 0]] * R[[2, 2]] - R[[1, 2]] * R[[2, 0]])
        + R[[0, 2]] * (R[[1, 0]] * R[[2, 1]] - R[[1, 1]] * R[[2, 0]]);
    let orth = R.t().dot(R) - nd::Array2::<f64>::eye(3);
    if (det - 1.0).abs() > 1e-6 || orth.iter().any(|x| x.abs() > 1e-6) {
        return Err(AngmomError::domain("quantisation axes do not form a proper rotation"));
    }
    let cos = ((R.diag().sum() - 1.0) / 2.0).clamp(-1.0, 1.0);
    let angle = cos.acos();
    if angle < 1e-12 { return Ok([0.0; 3]); }
    let anti = [
        R[[2, 1]] - R[[1, 2]],
        R[[0, 2]] - R[[2, 0]],
        R[[1, 0]] - R[[0, 1]],
    ];
    let sin = angle.sin();
    if sin > 1e-6 {
        let f = angle / (2.0 * sin);
        return Ok([anti[0] * f, anti[1] * f, anti[2] * f]);
    }
    // angle ~ pi: axis from the symmetric part (R + I) / 2 = n n^T
    let k = (0..3)
        .max_by(|&a, &b| R[[a, a]].total_cmp(&R[[b, b]]))
        .unwrap_or(0);
    let nk = ((R[[k, k]] + 1.0) / 2.0).max(0.0).sqrt();
    let mut axis = [0.0; 3];
    for (i, ax) in axis.iter_mut().enumerate() {
        *ax = if i == k { nk } else { (R[[k, i]] + R[[i, k]]) / (4.0 * nk) };
    }
    let norm = axis.iter().map(|x| x * x).sum::<f64>().sqrt();
    Ok([
        axis[0] / norm * angle,
        axis[1] / norm * angle,
        axis[2] / norm * angle,
    ])
}
