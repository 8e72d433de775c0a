use conv_rs::registry::{create_kernels, has_kernels, list_kernels, register_kernels};
use conv_rs_backend_tests::RecordingKernels;

#[test]
fn kernel_registry_round_trip() {
    conv_rs_backend_ref_cpu::register_cpu_kernels();
    register_kernels("recording", RecordingKernels::new);

    let names = list_kernels();
    assert!(names.contains(&"cpu".to_string()));
    assert!(names.contains(&"recording".to_string()));
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);

    let cpu = create_kernels("cpu").expect("failed to create cpu kernels");
    assert_eq!(cpu.kernels_name(), "cpu");
    let recording = create_kernels("recording").expect("failed to create recording kernels");
    assert_eq!(recording.kernels_name(), "recording");

    assert!(!has_kernels("nonexistent"));
    assert!(create_kernels("nonexistent").is_none());
}
