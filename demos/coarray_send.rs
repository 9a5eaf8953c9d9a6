use lamellar_caf::{config, Backend, CafRuntime, CafRuntimeBuilder, LocalFabric, RegistrationKind};

const LEN: usize = 1024;

fn image_main(caf: CafRuntime) -> anyhow::Result<()> {
    let me = caf.this_image();
    let num_images = caf.num_images();
    let token = caf.register(LEN * num_images, RegistrationKind::CoarrayStatic)?;

    let data = vec![me as u8; LEN];
    let timer = std::time::Instant::now();
    for image in 1..=num_images {
        caf.send(&token, (me - 1) * LEN, image, &data, true)?;
    }
    caf.sync_all()?;
    let elapsed = timer.elapsed().as_secs_f64();

    let share = unsafe { token.local_slice() };
    for (i, block) in share.chunks(LEN).enumerate() {
        if block.iter().any(|&b| b as usize != i + 1) {
            anyhow::bail!("image {me}: block {} holds unexpected data", i + 1);
        }
    }
    println!(
        "image {me}/{num_images}: sent {} bytes in {elapsed:.6}s, all {num_images} blocks verified",
        LEN * num_images
    );
    caf.finalize();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    match Backend::default() {
        Backend::Shmem => image_main(CafRuntimeBuilder::new().with_lamellae(Backend::Shmem).build()),
        Backend::Local => {
            let fabric = LocalFabric::new(config().num_pes);
            let images = (0..fabric.num_pes())
                .map(|pe| {
                    let fabric = fabric.clone();
                    std::thread::spawn(move || {
                        image_main(CafRuntimeBuilder::new().with_local_fabric(fabric, pe).build())
                    })
                })
                .collect::<Vec<_>>();
            for image in images {
                image
                    .join()
                    .map_err(|_| anyhow::anyhow!("image thread panicked"))??;
            }
            Ok(())
        }
    }
}
