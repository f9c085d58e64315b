use abof::*;

fn main() -> BofResult<()> {
    env_logger::init();

    // Load training and test images
    let train = load_imgs_from_dir("data/train")?;
    let test = load_imgs_from_dir("data/test")?;
    println!("Loaded {} train and {} test images.", train.len(), test.len());

    // Learn the vocabulary and histogram the training set in one pass
    let config = Config::default().with_vocabulary_size(50).with_seed(0);
    let mut bof = BagOfFeatures::<Sift>::new(config)?;
    let train_rows = bof.fit_transform(&train)?;
    println!("\nVocabulary = {:#?}", bof.vocabulary());

    // Match every test image to its closest training image
    let test_rows = bof.transform(&test)?;
    for (i, row) in test_rows.iter().enumerate() {
        let best = train_rows
            .iter()
            .enumerate()
            .map(|(j, t)| (j, row.l1(t)))
            .fold((0, f32::MIN), |a, b| if b.1 > a.1 { b } else { a });
        println!(
            "test {:>3}: {:>4} descriptors, best train match {} (score {:.3})",
            i,
            row.total(),
            best.0,
            best.1
        );
    }
    Ok(())
}
