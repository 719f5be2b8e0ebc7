#![no_main]

use risc0_zkvm::guest::env;
use zkmail_circuit::ExecutionRequest;

risc0_zkvm::guest::entry!(main);

fn main() {
    let frame: Vec<u8> = env::read_frame();
    let request: ExecutionRequest = match serde_json::from_slice(&frame) {
        Ok(request) => request,
        Err(e) => panic!("bad execution request: {}", e),
    };
    // a failing constraint aborts the guest, so no receipt exists for it
    let journal = match request.run() {
        Ok(journal) => journal,
        Err(e) => panic!("{}", e),
    };
    env::commit(&journal);
}
