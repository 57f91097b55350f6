//! The 3×3 box blur, scheduled two ways, must produce identical pixels.

#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use weft_rt::BufferT;
use weft_target::Target;
use weftc::demo::{blur, BlurSchedule};

const W: usize = 64;
const H: usize = 32;

/// Deterministic 16-bit noise.
fn noise_input(width: usize, height: usize) -> Vec<u16> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    (0..width * height)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 32) as u16
        })
        .collect()
}

/// Straightforward serial rendition with the same wrapping arithmetic
/// the pipeline's uint16 operations have.
fn reference(input: &[u16], width: usize) -> Vec<u16> {
    let height = input.len() / width;
    let at = |x: usize, y: usize| input[y * width + x];
    let mut blur_x = vec![0u16; width * height];
    for y in 0..height {
        for x in 1..width - 1 {
            let sum = at(x - 1, y).wrapping_add(at(x, y)).wrapping_add(at(x + 1, y));
            blur_x[y * width + x] = sum / 3;
        }
    }
    let bx = |x: usize, y: usize| blur_x[y * width + x];
    let mut out = vec![0u16; W * H];
    for y in 1..=H {
        for x in 1..=W {
            let sum = bx(x, y - 1).wrapping_add(bx(x, y)).wrapping_add(bx(x, y + 1));
            out[(y - 1) * W + (x - 1)] = sum / 3;
        }
    }
    out
}

fn run_blur(schedule: BlurSchedule) -> Vec<u16> {
    let target = Target::parse("x86-64-linux").unwrap();
    let module = blur(schedule, W as i64, H as i64)
        .unwrap()
        .compile(&target)
        .unwrap();

    let mut input = noise_input(W + 2, H + 2);
    let mut output = vec![0u16; W * H];

    let mut in_buf = BufferT::dense(
        input.as_mut_ptr().cast(),
        &[(W + 2) as i32, (H + 2) as i32],
        2,
    );
    let mut out_buf = BufferT::dense(output.as_mut_ptr().cast(), &[W as i32, H as i32], 2);
    // The output's coordinates start at (1, 1).
    out_buf.min = [1, 1, 0, 0];

    module
        .realize(&mut [("input", &mut in_buf), ("blur_y", &mut out_buf)], &[])
        .unwrap();
    output
}

#[test]
fn tiled_and_inline_schedules_agree() {
    let tiled = run_blur(BlurSchedule::Tiled);
    let inline = run_blur(BlurSchedule::Inline);
    assert_eq!(tiled, inline);
}

#[test]
fn breadth_first_schedule_agrees_too() {
    let breadth = run_blur(BlurSchedule::Breadth);
    let inline = run_blur(BlurSchedule::Inline);
    assert_eq!(breadth, inline);
}

#[test]
fn blur_matches_the_reference() {
    let out = run_blur(BlurSchedule::Tiled);
    let expected = reference(&noise_input(W + 2, H + 2), W + 2);
    assert_eq!(out, expected);
}

/// Wall-clock comparison of the schedules under the reference executor.
/// Informational only: executor overhead dominates, so no speedup is
/// asserted; run with `--ignored --nocapture` to see the numbers.
#[test]
#[ignore = "timing comparison for manual runs"]
fn schedule_timing_report() {
    for schedule in [
        BlurSchedule::Breadth,
        BlurSchedule::Inline,
        BlurSchedule::Tiled,
    ] {
        let start = std::time::Instant::now();
        let _ = run_blur(schedule);
        println!("{schedule:?}: {:?}", start.elapsed());
    }
}
