mod common;

use common::run_images;
use lamellar_caf::{CafError, CafOp, Images, RegistrationKind, StatusSink, STAT_STOPPED_IMAGE};
use serial_test::serial;

#[test]
#[serial]
fn image_identity() {
    let ids = run_images(4, |caf| {
        caf.init();
        caf.init();
        assert_eq!(caf.num_images(), 4);
        caf.this_image()
    });
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
#[serial]
fn register_then_deregister() {
    run_images(3, |caf| {
        caf.init();
        let baseline = caf.registered_bytes();
        let mut stat = -1;
        let token = caf
            .report(
                caf.register(40, RegistrationKind::CoarrayAlloc),
                Some(&mut StatusSink::stat_only(&mut stat)),
            )
            .unwrap();
        assert_eq!(stat, 0);
        assert_eq!(token.num_images(), 3);
        assert_eq!(token.size(), 40);
        assert!(!token.local_ptr().is_null());
        assert!(caf.registered_bytes() >= baseline + 40);
        // a fresh registration reads as zero
        assert!(unsafe { token.local_slice() }.iter().all(|&b| b == 0));

        let mut stat = -1;
        caf.report(
            caf.deregister(token),
            Some(&mut StatusSink::stat_only(&mut stat)),
        );
        assert_eq!(stat, 0);
        assert_eq!(caf.registered_bytes(), baseline);
        assert_eq!(caf.num_registrations(), 0);
    });
}

#[test]
#[serial]
fn static_registrations_are_released_by_finalize() {
    run_images(2, |caf| {
        let _a = caf.register(16, RegistrationKind::CoarrayStatic).unwrap();
        assert_eq!(caf.num_static_registrations(), 1);
        let _l = caf.register(8, RegistrationKind::LockStatic).unwrap();
        let d = caf.register(8, RegistrationKind::CoarrayAlloc).unwrap();
        assert_eq!(caf.num_static_registrations(), 2);
        caf.deregister(d).unwrap();
        caf.finalize();
        assert_eq!(caf.num_static_registrations(), 0);
        assert_eq!(caf.registered_bytes(), 0);
    });
}

#[test]
#[serial]
fn stopped_image_rejects_everything() {
    run_images(2, |caf| {
        let token = caf.register(8, RegistrationKind::CoarrayAlloc).unwrap();
        caf.finalize();

        let mut stat = 0;
        let mut msg = [0u8; 60];
        caf.report(
            caf.deregister(token.clone()),
            Some(&mut StatusSink::new(&mut stat, &mut msg)),
        );
        assert_eq!(stat, STAT_STOPPED_IMAGE);
        let expected = "Failed to deallocate coarray - there are stopped images";
        assert_eq!(&msg[..expected.len()], expected.as_bytes());
        assert!(msg[expected.len()..].iter().all(|&b| b == b' '));

        let mut stat = 0;
        let mut msg = [0u8; 45];
        caf.report(
            caf.sync_images(Images::AllOthers),
            Some(&mut StatusSink::new(&mut stat, &mut msg)),
        );
        assert_eq!(stat, STAT_STOPPED_IMAGE);
        assert_eq!(&msg, b"SYNC IMAGES failed - there are stopped images");

        assert!(matches!(
            caf.register(8, RegistrationKind::CoarrayStatic),
            Err(CafError::StoppedImage(CafOp::Register))
        ));
        assert!(matches!(
            caf.sync_all(),
            Err(CafError::StoppedImage(CafOp::SyncAll))
        ));
        assert!(matches!(
            caf.send(&token, 0, 1, &[1], false),
            Err(CafError::StoppedImage(CafOp::Send))
        ));
    });
}
