mod common;

use assert_cmd::assert::OutputAssertExt;
use common::{child_command, is_child};
use lamellar_caf::{Backend, CafRuntime, CafRuntimeBuilder, Images, RegistrationKind};
use serial_test::serial;

use std::process::{Output, Stdio};

// start one process per image of a shmem job and wait for all of them
fn run_shmem_job(test: &str, num_images: usize, job: usize) -> Vec<Output> {
    // distinct per run so stale segments of an earlier run are never attached
    let job_id = std::process::id() as usize * 16 + job;
    let children = (0..num_images)
        .map(|pe| {
            child_command(test)
                .env("LAMELLAR_BACKEND", "shmem")
                .env("LAMELLAR_NUM_PES", num_images.to_string())
                .env("LAMELLAR_PE_ID", pe.to_string())
                .env("LAMELLAR_JOB_ID", job_id.to_string())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .expect("spawn image process")
        })
        .collect::<Vec<_>>();
    children
        .into_iter()
        .map(|child| child.wait_with_output().expect("wait for image process"))
        .collect()
}

fn shmem_image() -> CafRuntime {
    CafRuntimeBuilder::new().with_lamellae(Backend::Shmem).build()
}

fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_ne_bytes(bytes.try_into().unwrap())
}

#[test]
#[serial]
fn counter_passed_around_a_ring() {
    if is_child() {
        let caf = shmem_image();
        let me = caf.this_image();
        let num_images = caf.num_images();
        let left = (me + num_images - 2) % num_images + 1;
        let right = me % num_images + 1;
        let _frame = caf.register(64, RegistrationKind::CoarrayStatic).unwrap();
        let counter = caf.register(8, RegistrationKind::CoarrayAlloc).unwrap();
        if me == 1 {
            unsafe { counter.local_slice_mut() }.copy_from_slice(&1u64.to_ne_bytes());
        }
        // hop k moves the counter from image k to image k + 1
        for hop in 1..num_images {
            if me == hop {
                let val = read_u64(unsafe { counter.local_slice() });
                caf.send(&counter, 0, right, &(val + 1).to_ne_bytes(), false)
                    .unwrap();
            }
            caf.sync_images(Images::List(&[left, right])).unwrap();
        }
        caf.sync_images(Images::AllOthers).unwrap();
        let val = read_u64(unsafe { counter.local_slice() });
        let mut buf = [0u8; 8];
        caf.get(&counter, 0, left, &mut buf).unwrap();
        assert_eq!(read_u64(&buf), left as u64);
        println!("image {me}: counter {val}");
        caf.sync_all().unwrap();
        caf.deregister(counter).unwrap();
        caf.finalize();
        assert_eq!(caf.num_static_registrations(), 0);
        return;
    }
    let num_images = 4;
    let outputs = run_shmem_job("counter_passed_around_a_ring", num_images, 1);
    for (pe, output) in outputs.into_iter().enumerate() {
        let image = pe + 1;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        output.assert().success();
        assert!(
            stdout.contains(&format!("image {image}: counter {image}")),
            "{stdout}"
        );
    }
}

#[test]
#[serial]
fn error_stop_aborts_every_process() {
    if is_child() {
        let caf = shmem_image();
        if caf.this_image() == 2 {
            caf.error_stop(5);
        }
        caf.sync_all().unwrap();
        return;
    }
    let outputs = run_shmem_job("error_stop_aborts_every_process", 3, 2);
    for (pe, output) in outputs.into_iter().enumerate() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        output.assert().code(5);
        if pe == 1 {
            assert!(stderr.contains("ERROR STOP 5"), "{stderr}");
        }
    }
}
