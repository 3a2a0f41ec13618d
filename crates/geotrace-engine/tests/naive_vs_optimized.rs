use geotrace_engine::{
    allclose, check_parity, near_identity, random_point, uniform_tensor, CoordinateTracer,
    EvalOptions, MatMul, OpCode, Tolerance,
};
use ndarray::{arr1, arr2, Array1, Array2, ArrayD};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn vec2(rng: &mut StdRng) -> Array1<f64> {
    random_point(rng, 2)
}

fn mat(rng: &mut StdRng, n: usize) -> Array2<f64> {
    uniform_tensor(rng, &[n, n])
        .into_dimensionality()
        .expect("square matrix")
}

fn ops(tracer: &CoordinateTracer, input_shape: &[usize]) -> Vec<OpCode> {
    let program = geotrace_engine::Compiler::compile(tracer.expr(), input_shape).unwrap();
    program.instrs().iter().map(|i| i.op()).collect()
}

fn assert_paths_agree(tracer: &CoordinateTracer, input: &ArrayD<f64>) {
    let naive = tracer.evaluate_naive(input).expect("naive evaluation");
    let optim = tracer.evaluate(input).expect("optimized evaluation");
    assert!(
        allclose(&naive.view(), &optim.view(), Tolerance::default()),
        "{tracer}\nnaive={naive}\noptim={optim}"
    );
}

#[test]
fn addition_with_constants_on_both_sides() {
    let mut rng = StdRng::seed_from_u64(11);
    let input = vec2(&mut rng).into_dyn();

    let coords = CoordinateTracer::new();
    let coords = coords + vec2(&mut rng);
    let coords = vec2(&mut rng) + coords;

    assert_paths_agree(&coords, &input);
}

#[test]
fn addition_scenario_matches_hand_computation() {
    let a = Array1::from(vec![0.25, -1.0]);
    let b = Array1::from(vec![2.0, 0.5]);
    let c = Array1::from(vec![1.0, 1.0]);

    let coords = CoordinateTracer::new() + &a;
    let coords = &b + coords;

    let expected = (&c + &a + &b).into_dyn();
    assert_eq!(coords.evaluate(&c).unwrap(), expected);
    assert_eq!(coords.evaluate_naive(&c).unwrap(), expected);
}

#[test]
fn matmul_chain_with_linear_and_homogeneous_matrices() {
    let mut rng = StdRng::seed_from_u64(23);
    let input = vec2(&mut rng).into_dyn();

    for _ in 0..10 {
        let coords = CoordinateTracer::new();
        let coords = coords.matmul(mat(&mut rng, 2));
        let coords = coords.matmul(mat(&mut rng, 3));
        let coords = mat(&mut rng, 2).matmul(coords);
        let coords = mat(&mut rng, 3).matmul(coords);

        assert_paths_agree(&coords, &input);
    }
}

#[test]
fn affine_steps_fuse_into_the_projective_transform_that_ends_them() {
    let mut rng = StdRng::seed_from_u64(5);
    let coords = CoordinateTracer::new().matmul(mat(&mut rng, 2)) + vec2(&mut rng);
    let coords = mat(&mut rng, 2).matmul(coords);
    let coords = near_identity(&mut rng, 3, 0.2).matmul(coords);

    assert_eq!(ops(&coords, &[2]), vec![OpCode::LoadInput, OpCode::Transform]);
    assert_paths_agree(&coords, &vec2(&mut rng).into_dyn());
}

#[test]
fn steps_after_a_projective_matrix_start_a_new_transform() {
    let mut rng = StdRng::seed_from_u64(6);
    let coords = CoordinateTracer::new()
        .matmul(mat(&mut rng, 2))
        .matmul(near_identity(&mut rng, 3, 0.2));
    let coords = mat(&mut rng, 2).matmul(coords) + vec2(&mut rng);

    assert_eq!(
        ops(&coords, &[2]),
        vec![OpCode::LoadInput, OpCode::Transform, OpCode::Transform]
    );
    assert_paths_agree(&coords, &vec2(&mut rng).into_dyn());
}

#[test]
fn point_sent_to_infinity_is_non_finite_on_both_paths() {
    // The first matrix maps (0, 1) to w = 0; the second would bring w back to 1 if the two
    // were composed before dividing.
    let h1 = arr2(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
    let h2 = arr2(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 1.0]]);
    let coords = h2.matmul(h1.matmul(CoordinateTracer::new()));
    let input = arr1(&[0.0, 1.0]);

    let naive = coords.evaluate_naive(&input).unwrap();
    let optim = coords.evaluate(&input).unwrap();
    assert!(naive.iter().all(|v| !v.is_finite()), "naive={naive}");
    assert!(optim.iter().all(|v| !v.is_finite()), "optim={optim}");
    assert_eq!(
        ops(&coords, &[2]),
        vec![OpCode::LoadInput, OpCode::Transform, OpCode::Transform]
    );

    // Away from the singular point both paths are ordinary.
    assert_paths_agree(&coords, &arr1(&[2.0, 1.0]).into_dyn());
}

#[test]
fn deep_translation_chain_evaluates_on_both_paths() {
    let mut coords = CoordinateTracer::new();
    for _ in 0..100_000 {
        coords = coords + arr1(&[1.0, -1.0]);
    }
    let input = arr1(&[0.5, 0.5]);
    let expected = arr1(&[100_000.5, -99_999.5]).into_dyn();

    assert_eq!(coords.evaluate_naive(&input).unwrap(), expected);
    assert!(allclose(
        &coords.evaluate(&input).unwrap().view(),
        &expected.view(),
        Tolerance::default()
    ));
    assert_eq!(ops(&coords, &[2]), vec![OpCode::LoadInput, OpCode::Transform]);
}

#[test]
fn deep_generic_chain_evaluates_on_both_paths() {
    let x = CoordinateTracer::new();
    let mut coords = x.clone();
    for _ in 0..100_000 {
        coords = &coords + &x;
    }
    let input = arr1(&[1.0, -2.0]);
    let expected = arr1(&[100_001.0, -200_002.0]).into_dyn();

    assert_eq!(coords.evaluate_naive(&input).unwrap(), expected);
    assert_eq!(coords.evaluate(&input).unwrap(), expected);
}

#[test]
fn repeated_self_composition_compiles_linearly() {
    let mut coords = CoordinateTracer::new() + arr1(&[1.0, 1.0]);
    for _ in 0..40 {
        coords = &coords + &coords;
    }
    let input = arr1(&[0.5, -1.0]);

    // One load, one fused translation, then one add per doubling.
    let program = geotrace_engine::Compiler::compile(coords.expr(), &[2]).unwrap();
    assert_eq!(program.instrs().len(), 42);

    let scale = 2f64.powi(40);
    let expected = arr1(&[1.5 * scale, 0.0]).into_dyn();
    assert_eq!(coords.evaluate(&input).unwrap(), expected);
}

#[test]
fn shallow_self_composition_agrees_with_naive() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut coords = mat(&mut rng, 3).matmul(CoordinateTracer::new() + vec2(&mut rng));
    for _ in 0..10 {
        coords = &coords + &coords;
    }
    assert_paths_agree(&coords, &vec2(&mut rng).into_dyn());
}

#[test]
fn batches_of_points_agree_including_parallel_divide() {
    let mut rng = StdRng::seed_from_u64(99);
    let input = uniform_tensor(&mut rng, &[257, 2]);

    let coords = CoordinateTracer::new() + vec2(&mut rng);
    let coords = near_identity(&mut rng, 3, 0.3).matmul(coords);
    let coords = coords.matmul(mat(&mut rng, 2));
    let coords = coords + Array2::from_shape_vec((1, 2), vec![0.5, -0.5]).unwrap();

    let sequential = coords.evaluate(&input).unwrap();
    let parallel = coords
        .evaluate_with_options(
            &input,
            &EvalOptions {
                parallel_min_points: 1,
            },
        )
        .unwrap();
    let naive = coords.evaluate_naive(&input).unwrap();

    assert_eq!(sequential.shape(), &[257, 2]);
    assert!(allclose(&sequential.view(), &naive.view(), Tolerance::default()));
    assert!(allclose(&parallel.view(), &naive.view(), Tolerance::default()));
}

#[test]
fn tracer_combined_with_itself() {
    let mut rng = StdRng::seed_from_u64(41);
    let input = vec2(&mut rng).into_dyn();

    let base = CoordinateTracer::new().matmul(mat(&mut rng, 2)) + vec2(&mut rng);
    let sum = &base + &base;
    let projected = near_identity(&mut rng, 3, 0.3).matmul(sum);
    let dot = (&projected).matmul(&base);

    assert_paths_agree(&projected, &input);
    assert_paths_agree(&dot, &input);
    assert_eq!(dot.evaluate(&input).unwrap().ndim(), 0);
}

#[test]
fn evaluation_is_repeatable_across_inputs() {
    let mut rng = StdRng::seed_from_u64(8);
    let coords = near_identity(&mut rng, 3, 0.3).matmul(CoordinateTracer::new() + 1.0);

    for _ in 0..5 {
        let input = vec2(&mut rng);
        let report = check_parity(&coords, &input, Tolerance::default()).unwrap();
        assert!(report.agree, "{report:?}");
        let again = check_parity(&coords, &input, Tolerance::default()).unwrap();
        assert_eq!(report.optimized, again.optimized);
    }
    assert_eq!(coords.compiled_programs(), 1);
}
