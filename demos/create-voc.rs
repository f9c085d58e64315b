use abof::{extract, *};

fn main() -> BofResult<()> {
    env_logger::init();

    // Extract SIFT descriptors from images
    let sift = Sift::create(&ExtractorParams::default())?;
    let imgs = load_imgs_from_dir("data/train")?;
    let features = extract::pool(&extract::extract_all(&sift, &imgs)?);
    println!("Detected {} SIFT features.", features.len());

    // Create vocabulary from features
    let voc = Vocabulary::create(&features, 100, &KMeansParams::default())?;
    println!("\nVocabulary = {:#?}", voc);

    // Save vocab and load it again just for fun
    voc.save("vocabs/test.voc")?;
    let loaded_voc = Vocabulary::load("vocabs/test.voc")?;

    // Make sure save & load worked
    assert_eq!(voc, loaded_voc);
    Ok(())
}
