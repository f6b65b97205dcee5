fn main() {
    println!("cargo:rerun-if-changed=src/binding/logger.c");
    cc::Build::new()
        .file("src/binding/logger.c")
        .compile("fmulogger");
}
