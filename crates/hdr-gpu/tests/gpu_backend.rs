//! These tests need a wgpu adapter. On machines without one they return
//! early after printing why.

use std::sync::{Arc, Mutex};

use hdr_core::filters::{
    GradDomParams, HistEqParams, ReinhardGlobalParams, ReinhardLocalParams, StitchingParams,
};
use hdr_core::{
    Backend, Exposure, ExposureSet, Filter, FilterError, FilterInput, FilterKind, Interop, Method,
    Params, PixelBuffer, StatusSink,
};
use hdr_gpu::{GpuBackend, GpuTexture};

fn scene(width: u32, height: u32) -> PixelBuffer {
    let mut buf = PixelBuffer::new(width, height);
    let w = width as usize;
    for (i, px) in buf.data.chunks_exact_mut(4).enumerate() {
        let (x, y) = ((i % w) as f32, (i / w) as f32);
        let r = 0.05 + 0.9 * (x / width as f32);
        let g = (0.5 + 0.5 * (y * 0.3).cos()) * 0.8;
        let b = if (x as usize / 4 + y as usize / 4) % 2 == 0 { 0.7 } else { 0.2 };
        px.copy_from_slice(&[r, g, b, 1.0]);
    }
    buf
}

fn bracket(width: u32, height: u32) -> ExposureSet {
    let base = scene(width, height);
    let images = [0.25_f32, 1.0, 4.0]
        .into_iter()
        .map(|exposure| {
            let mut buffer = base.clone();
            for (i, v) in buffer.data.iter_mut().enumerate() {
                if i % 4 != 3 {
                    *v = (*v * exposure).min(1.0);
                }
            }
            Exposure { buffer, exposure }
        })
        .collect();
    ExposureSet::new(images).unwrap()
}

async fn backend(params: &Params, status: &StatusSink) -> Option<GpuBackend> {
    match GpuBackend::new(params, status).await {
        Ok(backend) => Some(backend),
        Err(
            err @ (FilterError::PlatformOutOfRange { .. } | FilterError::DeviceOutOfRange { .. }),
        ) => {
            eprintln!("skipping: {err}");
            None
        }
        Err(err) => panic!("GPU backend failed to start: {err}"),
    }
}

async fn run_verified(kind: FilterKind, input: FilterInput, interop: Interop) {
    let params = Params {
        interop,
        ..Default::default()
    };
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let captured = lines.clone();
    let status = StatusSink::new(move |msg| captured.lock().unwrap().push(msg.to_string()));
    let Some(mut gpu) = backend(&params, &status).await else {
        return;
    };
    let name = kind.name();
    let mut filter = Filter::new(kind).with_status(status);

    let outcome = filter
        .run(Method::Parallel(&mut gpu), &input, &params)
        .unwrap();
    let report = outcome.verification.expect("verification enabled by default");
    assert!(
        report.passed(),
        "{name}: {} mismatches, max diff {}",
        report.mismatches,
        report.max_diff
    );
    let lines = lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.starts_with("Using device:")), "{lines:?}");
    assert!(lines.iter().any(|l| l.starts_with("Local size: 256")), "{lines:?}");
}

#[tokio::test]
async fn hist_eq_gpu_matches_reference() {
    run_verified(
        FilterKind::HistEq(HistEqParams::default()),
        scene(64, 48).into(),
        Interop::Buffer,
    )
    .await;
}

#[tokio::test]
async fn reinhard_global_gpu_matches_reference() {
    run_verified(
        FilterKind::ReinhardGlobal(ReinhardGlobalParams::default()),
        scene(64, 48).into(),
        Interop::Buffer,
    )
    .await;
}

#[tokio::test]
async fn reinhard_local_gpu_matches_reference() {
    run_verified(
        FilterKind::ReinhardLocal(ReinhardLocalParams::default()),
        scene(70, 45).into(),
        Interop::Buffer,
    )
    .await;
}

#[tokio::test]
async fn stitching_gpu_matches_reference() {
    run_verified(
        FilterKind::Stitching(StitchingParams::default()),
        bracket(40, 24).into(),
        Interop::Buffer,
    )
    .await;
}

#[tokio::test]
async fn texture_interop_matches_reference() {
    run_verified(
        FilterKind::ReinhardGlobal(ReinhardGlobalParams::default()),
        scene(33, 17).into(),
        Interop::Texture,
    )
    .await;
}

#[tokio::test]
async fn grad_dom_gpu_tracks_reference() {
    let params = Params::default();
    let status = StatusSink::silent();
    let Some(mut gpu) = backend(&params, &status).await else {
        return;
    };
    let kind = FilterKind::GradDom(GradDomParams::default());
    let input = FilterInput::from(scene(48, 40));
    let reference = kind.reference(&input).unwrap();
    let output = gpu.run(&kind, &input, &status).unwrap();
    let diff = reference.max_abs_diff(&output).unwrap();
    assert!(diff < 0.02, "max diff {diff}");
}

#[tokio::test]
async fn empty_image_passes_through() {
    let params = Params::default();
    let status = StatusSink::silent();
    let Some(mut gpu) = backend(&params, &status).await else {
        return;
    };
    let input = FilterInput::from(PixelBuffer::new(0, 0));
    for kind in [
        FilterKind::HistEq(HistEqParams::default()),
        FilterKind::GradDom(GradDomParams::default()),
    ] {
        let output = gpu.run(&kind, &input, &status).unwrap();
        assert_eq!(output.pixel_count(), 0);
    }
}

#[tokio::test]
async fn texture_round_trip_preserves_pixels() {
    let params = Params::default();
    let status = StatusSink::silent();
    let Some(gpu) = backend(&params, &status).await else {
        return;
    };
    let image = scene(21, 9);
    let texture = GpuTexture::from_pixel_buffer(gpu.context(), &image, "round_trip").unwrap();
    assert_eq!(texture.download(gpu.context()).unwrap(), image);
}

#[tokio::test]
async fn stitching_rejects_texture_input() {
    let params = Params::default();
    let status = StatusSink::silent();
    let Some(gpu) = backend(&params, &status).await else {
        return;
    };
    let texture = GpuTexture::from_pixel_buffer(gpu.context(), &scene(4, 4), "bracket").unwrap();
    let kind = FilterKind::Stitching(StitchingParams::default());
    assert!(matches!(
        gpu.run_texture(&kind, &texture, &status),
        Err(FilterError::WrongInput { .. })
    ));
}

#[tokio::test]
async fn out_of_range_platform_is_reported() {
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let captured = lines.clone();
    let status = StatusSink::new(move |msg| captured.lock().unwrap().push(msg.to_string()));
    let params = Params {
        platform_index: 99,
        ..Default::default()
    };
    let err = GpuBackend::new(&params, &status).await.err();
    assert!(
        matches!(err, Some(FilterError::PlatformOutOfRange { index: 99, .. })),
        "{err:?}"
    );
    let lines = lines.lock().unwrap();
    assert!(
        lines.iter().any(|l| l.contains("platform index 99 out of range")),
        "{lines:?}"
    );
}

#[tokio::test]
async fn hist_eq_gpu_handles_images_past_u32_level_products() {
    let params = Params::default();
    let status = StatusSink::silent();
    let Some(mut gpu) = backend(&params, &status).await else {
        return;
    };
    // 255 * pixels no longer fits in u32
    let (width, height) = (4096_u32, 4200_u32);
    let bytes = u64::from(width) * u64::from(height) * 16;
    if gpu.context().max_binding_size() < bytes {
        eprintln!("skipping: adapter binds fewer than {bytes} bytes");
        return;
    }
    let mut image = PixelBuffer::new(width, height);
    for (i, px) in image.data.chunks_exact_mut(4).enumerate() {
        let v = (i % 251) as f32 / 250.0;
        px.copy_from_slice(&[v, v * 0.5, 0.2, 1.0]);
    }
    let kind = FilterKind::HistEq(HistEqParams::default());
    let input = FilterInput::from(image);
    let output = gpu.run(&kind, &input, &status).unwrap();
    let reference = kind.reference(&input).unwrap();
    let diff = reference.max_abs_diff(&output).unwrap();
    assert!(diff <= 1.0 / 255.0, "max diff {diff}");
}
