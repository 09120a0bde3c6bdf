use std::sync::{Arc, Mutex};

use hdr_core::filters::{
    GradDomParams, HistEqParams, ReinhardGlobalParams, ReinhardLocalParams, StitchingParams,
};
use hdr_core::{
    Exposure, ExposureSet, Filter, FilterInput, FilterKind, HostBackend, Method, Params,
    PixelBuffer, StatusSink,
};

fn scene(width: u32, height: u32) -> PixelBuffer {
    let mut buf = PixelBuffer::new(width, height);
    let w = width as usize;
    for (i, px) in buf.data.chunks_exact_mut(4).enumerate() {
        let (x, y) = ((i % w) as f32, (i / w) as f32);
        let r = (0.5 + 0.5 * (x * 0.21).sin()) * 0.9;
        let g = (y / height as f32).powf(1.5);
        let b = if (x as usize / 8 + y as usize / 8) % 2 == 0 { 0.8 } else { 0.1 };
        px.copy_from_slice(&[r, g, b, 1.0]);
    }
    buf
}

fn bracket(width: u32, height: u32) -> ExposureSet {
    let base = scene(width, height);
    let images = [0.5_f32, 1.0, 2.0]
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

fn run_verified(kind: FilterKind, input: FilterInput) {
    let params = Params::default();
    let mut backend = HostBackend::new(&params, &StatusSink::silent())
        .unwrap()
        .with_local_size(64);
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let captured = lines.clone();
    let status = StatusSink::new(move |msg| captured.lock().unwrap().push(msg.to_string()));
    let name = kind.name();
    let mut filter = Filter::new(kind).with_status(status);

    let outcome = filter
        .run(Method::Parallel(&mut backend), &input, &params)
        .unwrap();
    let report = outcome.verification.expect("verification enabled by default");
    assert!(
        report.passed(),
        "{name}: {} mismatches, max diff {}",
        report.mismatches,
        report.max_diff
    );
    assert_eq!(outcome.output.width, input.width());
    let lines = lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.starts_with("Local size:")), "{name}: {lines:?}");
    assert!(lines.iter().any(|l| l == "Verification passed."), "{name}: {lines:?}");
}

#[test]
fn hist_eq_host_matches_reference() {
    run_verified(FilterKind::HistEq(HistEqParams::default()), scene(96, 64).into());
}

#[test]
fn reinhard_global_host_matches_reference() {
    run_verified(
        FilterKind::ReinhardGlobal(ReinhardGlobalParams::default()),
        scene(96, 64).into(),
    );
}

#[test]
fn reinhard_local_host_matches_reference() {
    run_verified(
        FilterKind::ReinhardLocal(ReinhardLocalParams::default()),
        scene(96, 64).into(),
    );
}

#[test]
fn grad_dom_host_matches_reference() {
    run_verified(FilterKind::GradDom(GradDomParams::default()), scene(96, 64).into());
}

#[test]
fn stitching_host_matches_reference() {
    run_verified(
        FilterKind::Stitching(StitchingParams::default()),
        bracket(48, 32).into(),
    );
}

#[test]
fn odd_sized_and_single_pixel_images() {
    for (w, h) in [(1, 1), (3, 1), (1, 5), (33, 17)] {
        run_verified(
            FilterKind::ReinhardLocal(ReinhardLocalParams::default()),
            scene(w, h).into(),
        );
        run_verified(FilterKind::GradDom(GradDomParams::default()), scene(w, h).into());
        run_verified(FilterKind::HistEq(HistEqParams::default()), scene(w, h).into());
    }
}

#[test]
fn stitched_output_can_be_tone_mapped() {
    let params = Params::default();
    let mut stitch = Filter::new(FilterKind::Stitching(StitchingParams::default()));
    let hdr = stitch
        .run(Method::Reference, &bracket(32, 32).into(), &params)
        .unwrap()
        .output;
    let mut tone_map = Filter::new(FilterKind::ReinhardGlobal(ReinhardGlobalParams::default()));
    let ldr = tone_map
        .run(Method::Reference, &FilterInput::from(hdr), &params)
        .unwrap()
        .output;
    assert!(ldr.data.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn uniform_gray_through_parallel_path() {
    let gray = PixelBuffer::filled(40, 30, [0.5, 0.5, 0.5, 1.0]);
    run_verified(FilterKind::HistEq(HistEqParams::default()), gray.clone().into());
    run_verified(
        FilterKind::ReinhardGlobal(ReinhardGlobalParams::default()),
        gray.clone().into(),
    );
    run_verified(
        FilterKind::ReinhardLocal(ReinhardLocalParams::default()),
        gray.clone().into(),
    );
    run_verified(FilterKind::GradDom(GradDomParams::default()), gray.clone().into());

    let params = Params::default();
    let mut backend = HostBackend::new(&params, &StatusSink::silent()).unwrap();
    let mut filter = Filter::new(FilterKind::HistEq(HistEqParams::default()));
    let outcome = filter
        .run(Method::Parallel(&mut backend), &gray.clone().into(), &params)
        .unwrap();
    assert_eq!(outcome.output, gray);
}

#[test]
fn hist_eq_300x300_end_to_end() {
    let input = FilterInput::from(scene(300, 300));
    let params = Params {
        tolerance: 0.0,
        ..Default::default()
    };
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let captured = lines.clone();
    let status = StatusSink::new(move |msg| captured.lock().unwrap().push(msg.to_string()));
    let mut filter = Filter::new(FilterKind::HistEq(HistEqParams::default())).with_status(status);

    let reference = filter.run(Method::Reference, &input, &params).unwrap().output;
    assert_eq!((reference.width, reference.height), (300, 300));
    assert!(reference.data.iter().all(|v| (0.0..=1.0).contains(v)));
    assert!(filter.verify(&reference, &reference, 0.0).passed());

    let mut backend = HostBackend::new(&params, &StatusSink::silent()).unwrap();
    let outcome = filter
        .run(Method::Parallel(&mut backend), &input, &params)
        .unwrap();
    let report = outcome.verification.expect("verification enabled by default");
    assert!(report.passed(), "max diff {}", report.max_diff);
    assert_eq!(report.mismatches, 0);
    let lines = lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.starts_with("Reference took")), "{lines:?}");
    assert!(lines.iter().any(|l| l.starts_with("host implementation took")), "{lines:?}");
}
