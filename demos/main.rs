use png_decode::load_image;
use std::{env, path::Path, process::exit};

fn main() {
    env_logger::init();

    let mut args = env::args();
    let program_name = args.next().expect("program name not found");

    let path = match args.next() {
        None => {
            println!("USAGE: {} <filepath.png>", program_name);
            exit(1);
        }
        Some(path) => path,
    };

    let image = match load_image::<u8>(Path::new(&path)) {
        Err(error) => {
            println!("ERROR: {}", error);
            exit(1);
        }
        Ok(image) => image,
    };

    println!(
        "{}: {}x{}, {} channels, {} samples",
        path,
        image.width,
        image.height,
        image.channels,
        image.data.len()
    );
}
