use lamellar_caf::{
    config, Backend, CafRuntime, CafRuntimeBuilder, Images, LocalFabric, RegistrationKind,
};

const ROUNDS: usize = 100;

// Pass a counter around the ring; each hop is ordered with a SYNC IMAGES between neighbours.
fn image_main(caf: CafRuntime) -> anyhow::Result<()> {
    let me = caf.this_image();
    let num_images = caf.num_images();
    let left = (me + num_images - 2) % num_images + 1;
    let right = me % num_images + 1;
    let token = caf.register(std::mem::size_of::<u64>(), RegistrationKind::CoarrayAlloc)?;

    let timer = std::time::Instant::now();
    for round in 0..ROUNDS {
        if me == 1 && round == 0 {
            caf.send(&token, 0, right, &1u64.to_ne_bytes(), false)?;
        }
        caf.sync_images(Images::List(&[left, right]))?;
        let val = u64::from_ne_bytes(unsafe { token.local_slice() }.try_into()?);
        caf.sync_images(Images::List(&[left, right]))?;
        if val != 0 {
            caf.send(&token, 0, right, &(val + 1).to_ne_bytes(), false)?;
        }
    }
    caf.sync_all()?;
    let val = u64::from_ne_bytes(unsafe { token.local_slice() }.try_into()?);
    println!(
        "image {me}/{num_images}: {ROUNDS} rounds in {:.6}s, counter here is {val}",
        timer.elapsed().as_secs_f64()
    );
    caf.deregister(token)?;
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
