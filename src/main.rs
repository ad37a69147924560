fn main() -> std::process::ExitCode {
    podlift_lib::run()
}
