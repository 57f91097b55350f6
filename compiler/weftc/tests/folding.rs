//! Sliding-window storage folding: smaller allocation, identical bits.

#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use weft_func::{Func, ImageParam, Var};
use weft_ir::Type;
use weft_rt::BufferT;
use weft_target::Target;
use weftc::Pipeline;

const W: i64 = 32;
const H: i64 = 32;

fn sliding_pipeline(fold: bool) -> Pipeline {
    let (x, y) = (Var::new("x"), Var::new("y"));
    let input = ImageParam::new(Type::uint(16), 2, "input");

    let mut producer = Func::new("producer");
    producer
        .define(
            &[x.clone(), y.clone()],
            vec![input.at([x.expr(), y.expr()]) * 3 + 7],
        )
        .unwrap();

    let mut consumer = Func::new("consumer");
    consumer
        .define(
            &[x.clone(), y.clone()],
            vec![
                producer.at([x.expr(), y.expr()])
                    + producer.at([x.expr(), y.expr() + 1])
                    + producer.at([x.expr(), y.expr() + 2]),
            ],
        )
        .unwrap();
    consumer.bound(&x, 0, W);
    consumer.bound(&y, 0, H);

    if fold {
        // Required along y is [y, y+2] at consumer row y; storing at the
        // root while computing per row folds the allocation to a
        // three-row window.
        producer.compute_at(&consumer, &y);
        producer.store_root();
    } else {
        producer.compute_root();
    }

    Pipeline::new(consumer).with_func(producer).with_image(input)
}

fn run(pipeline: &Pipeline) -> (String, Vec<u16>) {
    let module = pipeline
        .compile(&Target::parse("x86-64-linux").unwrap())
        .unwrap();

    let mut input: Vec<u16> = (0..(W * (H + 2)) as usize)
        .map(|i| (i * 37 % 1024) as u16)
        .collect();
    let mut output = vec![0u16; (W * H) as usize];
    let mut in_buf = BufferT::dense(input.as_mut_ptr().cast(), &[W as i32, (H + 2) as i32], 2);
    let mut out_buf = BufferT::dense(output.as_mut_ptr().cast(), &[W as i32, H as i32], 2);

    module
        .realize(
            &mut [("input", &mut in_buf), ("consumer", &mut out_buf)],
            &[],
        )
        .unwrap();
    (module.stmt.to_string(), output)
}

#[test]
fn folded_allocation_is_a_three_row_window() {
    let (printed, _) = run(&sliding_pipeline(true));
    assert!(
        printed.contains("allocate producer[uint16 * 32 * 3]"),
        "{printed}"
    );
    // Addressing goes modulo the window.
    assert!(printed.contains("% 3"), "{printed}");
}

#[test]
fn unfolded_allocation_covers_the_full_height() {
    let (printed, _) = run(&sliding_pipeline(false));
    assert!(
        printed.contains("allocate producer[uint16 * 32 * 34]"),
        "{printed}"
    );
}

#[test]
fn folded_and_unfolded_outputs_are_bit_identical() {
    let (_, folded) = run(&sliding_pipeline(true));
    let (_, unfolded) = run(&sliding_pipeline(false));
    assert_eq!(folded, unfolded);
}
