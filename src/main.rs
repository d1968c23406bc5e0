fn main() {
    tensorcost::cli::bin::cli()
}
