fn main() {
    // Only run the ESP-IDF build system for ESP-IDF targets (Xtensa or RISC-V).
    // Build scripts run on the host, so check the TARGET env var.
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("espidf") {
            embuild::espidf::sysenv::output();
        }
    }
}
