// 构建脚本: 启用 camera 特性时链接FFmpeg静态库的系统依赖
use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_CAMERA");

    if env::var_os("CARGO_FEATURE_CAMERA").is_none() {
        return;
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();

    // 仅在Windows MSVC环境下添加 (DirectShow 采集需要)
    if target_os == "windows" && target_env == "msvc" {
        // OLE 自动化和VFW
        println!("cargo:rustc-link-lib=dylib=oleaut32");
        println!("cargo:rustc-link-lib=dylib=vfw32");
        println!("cargo:rustc-link-lib=dylib=strmiids");

        // Secure Channel (TLS/SSL)
        println!("cargo:rustc-link-lib=dylib=secur32");
    }
}
