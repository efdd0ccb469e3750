use deepnet::prelude::*;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WORKERS: usize = 4;
const ROWS_PER_WORKER: usize = 500;
const PASSES: usize = 10;

/// Two numeric features and one of three categories; the class is decided by
/// which third of the plane the point falls into, shifted by the category.
fn synthetic_rows(rng: &mut StdRng, n: usize) -> Vec<TrainingRow> {
    (0..n)
        .map(|_| {
            let cat = rng.gen_range(0..3);
            let x: f64 = rng.gen_range(-1.0..1.0);
            let y: f64 = rng.gen_range(-1.0..1.0);
            let score = x + y + 0.5 * cat as f64 - 0.5;
            let class = if score < -0.5 {
                0
            } else if score < 0.5 {
                1
            } else {
                2
            };
            TrainingRow::new(InputRow::new(vec![cat], vec![x, y]), Target::Class(class))
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();

    let params = match std::env::args().nth(1) {
        Some(path) => Parameters::from_json_file(path)?,
        None => Parameters::from_json_str(
            r#"{
                "hidden": [16, 16],
                "activation": "Tanh",
                "hidden_dropout_ratios": [0.1, 0.1],
                "max_w2": 10.0,
                "l2": 1e-5
            }"#,
        )?,
    };

    let store = WeightStore::new(&params, InputLayout::new(3, 2), Some(3))?;
    let mut monitor = Network::new(&store, false)?;
    println!("{}", monitor.summary());

    let mut rng = StdRng::seed_from_u64(42);
    let partitions: Vec<Vec<TrainingRow>> = (0..WORKERS)
        .map(|_| synthetic_rows(&mut rng, ROWS_PER_WORKER))
        .collect();
    let holdout = synthetic_rows(&mut rng, 300);

    println!("initial holdout loss: {:.4}", monitor.mean_loss(&holdout)?);
    for pass in 0..PASSES {
        hogwild_pass(&store, &partitions, pass as u64)?;
        let loss = monitor.mean_loss(&holdout)?;
        info!("pass {} done, {} rows processed", pass, store.processed());
        println!("Pass: {}/{} holdout loss: {:.4}", pass + 1, PASSES, loss);
    }

    let mut correct = 0;
    for row in &holdout {
        let p = monitor.predict_row(&row.input)?;
        let predicted = p
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0;
        if row.target == Target::Class(predicted) {
            correct += 1;
        }
    }
    println!("\nholdout accuracy: {:.1}%", 100.0 * correct as f32 / holdout.len() as f32);

    Ok(())
}
