use conv_rs::ConvKernels;
use conv_rs_backend_faer::faer_conv_kernels;

conv_rs_backend_tests::define_kernel_tests!(faer_kernels, faer_conv_kernels);

#[test]
fn registry_exposes_faer_kernels() {
    conv_rs_backend_faer::register_faer_kernels();
    let kernels = conv_rs::registry::create_kernels("faer").expect("faer kernels registered");
    assert_eq!(kernels.kernels_name(), "faer");
}
