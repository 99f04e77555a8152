fn main() {
    prost_build::compile_protos(&["proto/peer.proto"], &["proto/"])
        .expect("failed to compile peer.proto");
}
