use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

use crate::layers::hashgrid::{self, CodebookLayout, HashGridInterpolate, ScatterStrategy};
use crate::ops::precision::{Accumulation, PrecisionPolicy};

fn kernel(half_inputs: bool, higher_precision: bool, deterministic: bool) -> HashGridInterpolate {
    let accumulation = if higher_precision {
        Accumulation::HigherPrecision
    } else {
        Accumulation::InputPrecision
    };
    let strategy = if deterministic {
        ScatterStrategy::SortReduce
    } else {
        ScatterStrategy::Atomic
    };
    HashGridInterpolate::new(
        PrecisionPolicy {
            half_inputs,
            accumulation,
        },
        strategy,
    )
}

#[pyfunction]
#[pyo3(signature = (coords, resolutions, codebook_bitwidth, lod_idx, codebook, codebook_sizes, codebook_first_idx, half_inputs=false, higher_precision=true))]
pub fn hashgrid_forward<'py>(
    py: Python<'py>,
    coords: PyReadonlyArray2<f32>,
    resolutions: Vec<u32>,
    codebook_bitwidth: u32,
    lod_idx: usize,
    codebook: PyReadonlyArray2<f32>,
    codebook_sizes: Vec<usize>,
    codebook_first_idx: Vec<usize>,
    half_inputs: bool,
    higher_precision: bool,
) -> PyResult<&'py PyArray2<f32>> {
    let coords_arr = coords.as_array();
    let codebook_arr = codebook.as_array();

    let (feats, _) = kernel(half_inputs, higher_precision, false).forward(
        coords_arr,
        &resolutions,
        codebook_bitwidth,
        lod_idx,
        codebook_arr,
        &codebook_sizes,
        &codebook_first_idx,
    )?;
    Ok(feats.into_pyarray(py))
}

#[pyfunction]
pub fn hashgrid_naive<'py>(
    py: Python<'py>,
    coords: PyReadonlyArray2<f32>,
    resolutions: Vec<u32>,
    codebook_bitwidth: u32,
    lod_idx: usize,
    codebook: PyReadonlyArray2<f32>,
    codebook_sizes: Vec<usize>,
    codebook_first_idx: Vec<usize>,
) -> PyResult<&'py PyArray2<f32>> {
    let coords_arr = coords.as_array();
    let codebook_arr = codebook.as_array();

    let feats = hashgrid::hashgrid_naive(
        &coords_arr,
        &resolutions,
        codebook_bitwidth,
        lod_idx,
        &codebook_arr,
        &codebook_sizes,
        &codebook_first_idx,
    )?;
    Ok(feats.into_pyarray(py))
}

/// 코드북 그래디언트만 돌려줍니다. 나머지 입력에는 그래디언트가 없습니다.
#[pyfunction]
#[pyo3(signature = (grad_output, coords, resolutions, codebook_bitwidth, lod_idx, codebook, codebook_sizes, codebook_first_idx, needs_codebook_grad=true, half_inputs=false, higher_precision=true, deterministic=false))]
pub fn hashgrid_backward<'py>(
    py: Python<'py>,
    grad_output: PyReadonlyArray2<f32>,
    coords: PyReadonlyArray2<f32>,
    resolutions: Vec<u32>,
    codebook_bitwidth: u32,
    lod_idx: usize,
    codebook: PyReadonlyArray2<f32>,
    codebook_sizes: Vec<usize>,
    codebook_first_idx: Vec<usize>,
    needs_codebook_grad: bool,
    half_inputs: bool,
    higher_precision: bool,
    deterministic: bool,
) -> PyResult<&'py PyArray2<f32>> {
    let grad_output_arr = grad_output.as_array();
    let coords_arr = coords.as_array();
    let codebook_arr = codebook.as_array();

    let ctx = kernel(half_inputs, higher_precision, deterministic).context(
        coords_arr,
        &resolutions,
        codebook_bitwidth,
        lod_idx,
        codebook_arr,
        &codebook_sizes,
        &codebook_first_idx,
    )?;
    let grads = HashGridInterpolate::backward(&ctx, &grad_output_arr, needs_codebook_grad)?;
    Ok(grads.codebook.into_pyarray(py))
}

/// 해상도 스케줄에 대한 `(sizes, first_idx)`
#[pyfunction]
pub fn codebook_layout(resolutions: Vec<u32>, codebook_bitwidth: u32) -> (Vec<usize>, Vec<usize>) {
    let layout = CodebookLayout::from_resolutions(&resolutions, codebook_bitwidth);
    (layout.sizes, layout.first_idx)
}

pub fn register(m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(hashgrid_forward, m)?)?;
    m.add_function(wrap_pyfunction!(hashgrid_naive, m)?)?;
    m.add_function(wrap_pyfunction!(hashgrid_backward, m)?)?;
    m.add_function(wrap_pyfunction!(codebook_layout, m)?)?;
    Ok(())
}
