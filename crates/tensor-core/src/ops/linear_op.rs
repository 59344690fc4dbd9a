// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fused linear projection and accumulating matrix multiply.

use crate::{DType, Shape, Tensor, TensorError, TensorView};

/// Computes a fused linear projection: `output = input @ weight + bias`.
///
/// `input` is `[M, K]`, `weight` is `[K, N]`, `bias` is `[N]`, and
/// `output` must be `[M, N]`. Every row of the output is seeded with the
/// bias before the multiply accumulates into it.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if dimensions are incompatible.
/// Returns [`TensorError::UnsupportedDType`] if any operand is not `F32`.
pub fn linear(
    input: &TensorView<'_>,
    weight: &TensorView<'_>,
    bias: &TensorView<'_>,
    output: &mut Tensor,
) -> Result<(), TensorError> {
    check_f32("linear", input)?;
    check_f32("linear", weight)?;
    check_f32("linear", bias)?;

    if !input.shape().is_matmul_compatible(weight.shape()) {
        return Err(TensorError::ShapeMismatch {
            op: "linear",
            lhs: input.shape().clone(),
            rhs: weight.shape().clone(),
        });
    }

    let m = input.shape().dims()[0];
    let k = input.shape().dims()[1];
    let n = weight.shape().dims()[1];

    if bias.shape() != &Shape::vector(n) {
        return Err(TensorError::ShapeMismatch {
            op: "linear (bias)",
            lhs: Shape::vector(n),
            rhs: bias.shape().clone(),
        });
    }

    let expected = Shape::matrix(m, n);
    if output.shape() != &expected || output.dtype() != DType::F32 {
        return Err(TensorError::ShapeMismatch {
            op: "linear (output)",
            lhs: expected,
            rhs: output.shape().clone(),
        });
    }

    let a = input.as_f32_slice();
    let w = weight.as_f32_slice();
    let b = bias.as_f32_slice();
    let c = output.as_f32_slice_mut();

    // Seed each output row with the bias, then accumulate the product.
    for i in 0..m {
        c[i * n..(i + 1) * n].copy_from_slice(b);
    }
    matmul_f32_acc(a, w, c, m, k, n);

    Ok(())
}

/// Accumulates a matrix product into an existing buffer:
/// `output += lhs @ rhs`.
///
/// `lhs` is `[M, K]`, `rhs` is `[K, N]`, `output` must be `[M, N]`. The
/// output is NOT zeroed first; callers chain this after [`linear`] to add
/// a second projection onto the same gate buffer.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if dimensions are incompatible.
/// Returns [`TensorError::UnsupportedDType`] if any operand is not `F32`.
pub fn matmul_acc(
    lhs: &TensorView<'_>,
    rhs: &TensorView<'_>,
    output: &mut Tensor,
) -> Result<(), TensorError> {
    check_f32("matmul_acc", lhs)?;
    check_f32("matmul_acc", rhs)?;

    if !lhs.shape().is_matmul_compatible(rhs.shape()) {
        return Err(TensorError::ShapeMismatch {
            op: "matmul_acc",
            lhs: lhs.shape().clone(),
            rhs: rhs.shape().clone(),
        });
    }

    let m = lhs.shape().dims()[0];
    let k = lhs.shape().dims()[1];
    let n = rhs.shape().dims()[1];

    let expected = Shape::matrix(m, n);
    if output.shape() != &expected || output.dtype() != DType::F32 {
        return Err(TensorError::ShapeMismatch {
            op: "matmul_acc (output)",
            lhs: expected,
            rhs: output.shape().clone(),
        });
    }

    matmul_f32_acc(
        lhs.as_f32_slice(),
        rhs.as_f32_slice(),
        output.as_f32_slice_mut(),
        m,
        k,
        n,
    );

    Ok(())
}

fn check_f32(op: &'static str, t: &TensorView<'_>) -> Result<(), TensorError> {
    if t.dtype() != DType::F32 {
        return Err(TensorError::UnsupportedDType { op, dtype: t.dtype() });
    }
    Ok(())
}

/// Portable f32 matrix multiply-accumulate.
///
/// Uses an ikj loop order so the inner loop is a saxpy on a row of `c`,
/// which is sequential in memory and cache-friendly on rows of `b`.
fn matmul_f32_acc(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    for i in 0..m {
        for p in 0..k {
            let a_ip = a[i * k + p];
            if a_ip == 0.0 {
                // One-hot inputs make most of this loop a no-op.
                continue;
            }
            let c_row = &mut c[i * n..(i + 1) * n];
            let b_row = &b[p * n..(p + 1) * n];
            for j in 0..n {
                c_row[j] += a_ip * b_row[j];
            }
        }
    }
}
