//! Integration tests for sampling, gradients and persistence.
//!
//! These tests verify:
//! - Gibbs sampling laws (spike range, slab gating, radius bound)
//! - Gradient buffers match the parameter layout
//! - A contrastive-divergence step driven through `RbmPolicy`
//! - Independent workspaces allow one model to be shared across threads
//! - Checkpoint round trips preserve the free energy

use approx::assert_abs_diff_eq;
use ndarray::{arr1, Array1, Array2, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use ssrbm::{
    load_checkpoint, save_checkpoint, Latent, RbmConfig, RbmPolicy, SpikeSlabRbm,
    MAX_VISIBLE_TRIALS,
};

fn seeded_rbm(visible: usize, hidden: usize, pool: usize, radius: f64, seed: u64) -> SpikeSlabRbm {
    let config = RbmConfig {
        visible_size: visible,
        hidden_size: hidden,
        pool_size: pool,
        radius,
        init_std: 0.5,
        ..RbmConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(seed);
    SpikeSlabRbm::from_config(&config, &mut rng).expect("valid config")
}

#[test]
fn test_slab_mean_zero_when_spike_inactive() {
    let rbm = seeded_rbm(6, 5, 3, 100.0, 1);
    let mut rng = StdRng::seed_from_u64(2);

    for _ in 0..50 {
        let v = Array1::from_shape_fn(6, |_| rand::Rng::gen_range(&mut rng, -2.0f64..2.0));
        let spike_mean = rbm.spike_mean(&v).expect("spike mean");
        let spikes = rbm.sample_spike(&spike_mean, &mut rng).expect("spikes");
        let slab_mean = rbm.slab_mean(&v, &spikes).expect("slab mean");

        for i in 0..5 {
            if spikes[i] == 0.0 {
                assert!(slab_mean.column(i).iter().all(|&m| m == 0.0));
            }
        }
    }
}

#[test]
fn test_spike_mean_strictly_inside_unit_interval() {
    let rbm = seeded_rbm(4, 6, 2, 100.0, 3);
    for scale in [1e-3, 0.5, 1.0, -1.0] {
        let v = Array1::from_elem(4, scale);
        let mean = rbm.spike_mean(&v).expect("spike mean");
        assert!(mean.iter().all(|&p| p > 0.0 && p < 1.0), "{mean:?}");
    }
}

#[test]
fn test_spike_mean_saturates_for_huge_inputs() {
    let mut rbm = SpikeSlabRbm::new(1, 1, 1, Array2::ones((1, 1)), 100.0).expect("valid");
    rbm.views_mut().expect("views").weight[[0, 0, 0]] = 1.0;

    // s = 10² / 2 = 50, past the point where σ rounds to 1 in f64.
    let mean = rbm.spike_mean(&arr1(&[10.0])).expect("spike mean");
    assert_eq!(mean[0], 1.0);
}

#[test]
fn test_sampling_is_reproducible_with_seed() {
    let rbm = seeded_rbm(5, 4, 2, 100.0, 4);
    let v = arr1(&[0.2, -0.1, 0.4, 1.0, -0.3]);

    let a = rbm
        .sample_hidden(&v, &mut StdRng::seed_from_u64(99))
        .expect("sample");
    let b = rbm
        .sample_hidden(&v, &mut StdRng::seed_from_u64(99))
        .expect("sample");
    assert_eq!(a, b);
}

#[test]
fn test_slab_sample_variance_matches_penalty() {
    let slab_penalty = ndarray::arr2(&[[4.0]]);
    let rbm = SpikeSlabRbm::new(1, 1, 1, slab_penalty, 100.0).expect("valid");
    let mut rng = StdRng::seed_from_u64(8);
    let mean = Array2::from_elem((1, 1), 1.5);

    let n = 20_000;
    let draws: Vec<f64> = (0..n)
        .map(|_| rbm.sample_slab(&mean, &mut rng).expect("slab")[[0, 0]])
        .collect();
    let avg = draws.iter().sum::<f64>() / n as f64;
    let var = draws.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / n as f64;

    assert_abs_diff_eq!(avg, 1.5, epsilon = 0.02);
    assert_abs_diff_eq!(var, 0.25, epsilon = 0.02);
}

#[test]
fn test_visible_sample_variance_matches_penalty() {
    let mut rbm = SpikeSlabRbm::new(2, 1, 1, Array2::ones((1, 1)), 1e6).expect("valid");
    {
        let mut views = rbm.views_mut().expect("views");
        views.weight[[0, 0, 0]] = 1.0;
        views.weight[[1, 0, 0]] = 2.0;
        views.visible_penalty.assign(&arr1(&[4.0, 0.25]));
    }
    let latent = Latent {
        spike: arr1(&[1.0]),
        slab: Array2::from_elem((1, 1), 0.5),
    };
    let mean = rbm.visible_mean(&latent).expect("visible mean");
    assert_abs_diff_eq!(mean[0], 0.125, epsilon = 1e-12);
    assert_abs_diff_eq!(mean[1], 4.0, epsilon = 1e-12);

    let mut rng = StdRng::seed_from_u64(9);
    let n = 20_000;
    let draws: Vec<Array1<f64>> = (0..n)
        .map(|_| {
            let sample = rbm.sample_visible_bounded(&latent, &mut rng).expect("visible");
            assert!(sample.within_radius);
            sample.visible
        })
        .collect();

    for (j, variance) in [(0, 0.25), (1, 4.0)] {
        let avg = draws.iter().map(|x| x[j]).sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x[j] - avg).powi(2)).sum::<f64>() / n as f64;
        assert_abs_diff_eq!(avg, mean[j], epsilon = 5.0 * (variance / n as f64).sqrt());
        assert_abs_diff_eq!(var, variance, epsilon = 0.05 * variance);
    }
}

#[test]
fn test_visible_sample_accepts_first_trial_with_large_radius() {
    let rbm = seeded_rbm(8, 4, 2, 1e6, 5);
    let mut rng = StdRng::seed_from_u64(6);
    let v = Array1::from_elem(8, 0.5);

    for _ in 0..20 {
        let latent = rbm.sample_hidden(&v, &mut rng).expect("hidden");
        let sample = rbm.sample_visible_bounded(&latent, &mut rng).expect("visible");
        assert_eq!(sample.trials, 1);
        assert!(sample.within_radius);
        assert_eq!(sample.visible.len(), 8);
    }
}

#[test]
fn test_visible_sample_keeps_last_draw_when_radius_unreachable() {
    let rbm = seeded_rbm(4, 2, 1, 1e-12, 7);
    let mut rng = StdRng::seed_from_u64(8);
    let latent = Latent::zeros(&rbm.layout());

    let sample = rbm.sample_visible_bounded(&latent, &mut rng).expect("visible");
    assert_eq!(sample.trials, MAX_VISIBLE_TRIALS);
    assert!(!sample.within_radius);
    assert_eq!(sample.visible.len(), 4);
    assert!(sample.visible.iter().all(|x| x.is_finite()));
}

#[test]
fn test_gradient_fills_whole_buffer() {
    for (v, h, p) in [(1, 1, 1), (4, 3, 2), (7, 2, 5)] {
        let rbm = seeded_rbm(v, h, p, 100.0, 10);
        let mut gradient = Array1::from_elem(v * p * h + h + v, f64::NAN);
        let mut ws = rbm.workspace();
        let input = Array1::from_elem(v, 0.25);

        RbmPolicy::positive_phase(
            &rbm,
            input.view(),
            gradient.view_mut(),
            &mut ws,
            &mut StdRng::seed_from_u64(11),
        )
        .expect("phase");

        assert_eq!(gradient.len(), rbm.num_parameters());
        assert!(gradient.iter().all(|g| g.is_finite()), "({v}, {h}, {p})");

        let layout = rbm.layout();
        let views = layout.views(gradient.view()).expect("views");
        assert_eq!(views.spike_bias, ws.spike_mean);
        assert!(views.visible_penalty.iter().all(|&g| g == -0.5 * 0.25 * 0.25));
    }
}

/// One CD-1 step as an external trainer would run it.
#[test]
fn test_contrastive_divergence_step_through_policy() {
    let mut rbm = seeded_rbm(6, 4, 2, 1e3, 12);
    let mut rng = StdRng::seed_from_u64(13);
    let mut ws = RbmPolicy::workspace(&rbm);
    let data = arr1(&[1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
    let n = RbmPolicy::num_parameters(&rbm);

    let mut positive = Array1::<f64>::zeros(n);
    let mut negative = Array1::<f64>::zeros(n);

    RbmPolicy::positive_phase(&rbm, data.view(), positive.view_mut(), &mut ws, &mut rng)
        .expect("positive");

    let hidden = RbmPolicy::sample_hidden(&rbm, data.view(), &mut rng).expect("hidden");
    assert_eq!(hidden.len(), rbm.layout().latent_len());
    let model_sample = RbmPolicy::sample_visible(&rbm, hidden.view(), &mut rng).expect("visible");
    assert_eq!(model_sample.len(), 6);

    RbmPolicy::negative_phase(&rbm, model_sample.view(), negative.view_mut(), &mut ws, &mut rng)
        .expect("negative");

    let before = rbm.free_energy(&data).expect("free energy");
    let learning_rate = 1e-3;
    let update = (&positive - &negative) * learning_rate;
    {
        let params = RbmPolicy::parameters_mut(&mut rbm);
        Zip::from(params).and(&update).for_each(|w, &d| *w += d);
    }
    RbmPolicy::reset(&mut rbm).expect("reset");

    let after = rbm.free_energy(&data).expect("free energy");
    assert!(after.is_finite());
    assert!(before.is_finite());
    assert!(rbm.visible_penalty().expect("views").iter().all(|&l| l > 0.0));
    assert_eq!(RbmPolicy::evaluate(&rbm, Array2::<f64>::zeros((6, 1)).view(), 0), 0.0);
}

#[test]
fn test_shared_model_with_per_thread_workspaces() {
    let rbm = seeded_rbm(5, 3, 2, 100.0, 14);
    let input = arr1(&[0.1, 0.2, 0.3, 0.4, 0.5]);

    let gradients: Vec<Array1<f64>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rbm = &rbm;
                let input = &input;
                scope.spawn(move || {
                    let mut ws = rbm.workspace();
                    let mut gradient = Array1::<f64>::zeros(rbm.num_parameters());
                    let mut rng = StdRng::seed_from_u64(15);
                    rbm.positive_phase(input, gradient.view_mut(), &mut ws, &mut rng)
                        .expect("phase");
                    gradient
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });

    for g in &gradients[1..] {
        assert_eq!(g, &gradients[0]);
    }
}

#[test]
fn test_serialization_round_trip_small_model() {
    let mut rbm = SpikeSlabRbm::new(2, 1, 1, Array2::from_elem((1, 1), 1.5), 10.0).expect("valid");
    rbm.parameters_mut()
        .assign(&arr1(&[0.7, -1.3, 0.25, 2.0, 0.5]));
    rbm.reset().expect("reset");

    let dir = std::env::temp_dir().join("ssrbm_integration_round_trip");
    let path = dir.join("model.json");
    save_checkpoint(&rbm, &path).expect("save");
    let loaded = load_checkpoint(&path).expect("load");

    let v = arr1(&[0.3, -0.9]);
    assert_abs_diff_eq!(
        loaded.free_energy(&v).expect("free energy"),
        rbm.free_energy(&v).expect("free energy"),
        epsilon = 1e-12
    );
    assert_eq!(loaded.parameters(), rbm.parameters());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_flat_latent_matches_typed_sample() {
    let rbm = seeded_rbm(4, 3, 2, 100.0, 16);
    let v = arr1(&[0.5, 0.5, -0.5, 1.0]);

    let typed = rbm
        .sample_hidden(&v, &mut StdRng::seed_from_u64(17))
        .expect("typed");
    let flat = RbmPolicy::sample_hidden(&rbm, v.view(), &mut StdRng::seed_from_u64(17))
        .expect("flat");

    assert_eq!(flat, typed.to_flat());
    assert_eq!(
        Latent::from_flat(&rbm.layout(), &flat).expect("latent"),
        typed
    );
}
