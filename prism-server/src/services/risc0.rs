//! RISC Zero proving backend
//!
//! The circuit ELF reads `SolvencyInput` and commits `SolvencyJournal`.

use risc0_zkvm::{
    compute_image_id, default_executor, default_prover, sha::Digest, ExecutorEnv, Receipt,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::prover::{
    BackendError, BackendFactory, ProvingBackend, SolvencyInput, Witness,
};
use crate::types::PublicInputs;

/// Public output committed by the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SolvencyJournal {
    threshold: u64,
    is_solvent: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Risc0Factory;

impl BackendFactory for Risc0Factory {
    fn build(&self, artifact: &[u8]) -> Result<Box<dyn ProvingBackend>, BackendError> {
        let image_id = compute_image_id(artifact)
            .map_err(|e| BackendError::InvalidArtifact(e.to_string()))?;
        debug!(image_id = %hex::encode(image_id.as_bytes()), "Computed circuit image id");

        Ok(Box::new(Risc0Backend {
            elf: artifact.to_vec(),
            image_id,
        }))
    }
}

struct Risc0Backend {
    elf: Vec<u8>,
    image_id: Digest,
}

impl Risc0Backend {
    fn env(input: &SolvencyInput) -> Result<ExecutorEnv<'static>, BackendError> {
        ExecutorEnv::builder()
            .write(input)
            .map_err(|e| BackendError::SerializationError(e.to_string()))?
            .build()
            .map_err(|e| BackendError::ExecutionFailed(e.to_string()))
    }
}

impl ProvingBackend for Risc0Backend {
    fn name(&self) -> &'static str {
        "risc0"
    }

    fn execute(&self, input: &SolvencyInput) -> Result<Witness, BackendError> {
        let session = default_executor()
            .execute(Self::env(input)?, &self.elf)
            .map_err(|e| BackendError::ExecutionFailed(e.to_string()))?;

        let journal: SolvencyJournal = session
            .journal
            .decode()
            .map_err(|e| BackendError::SerializationError(e.to_string()))?;
        if !journal.is_solvent || journal.threshold != input.threshold {
            return Err(BackendError::ExecutionFailed(
                "circuit did not commit a solvent claim for this threshold".to_string(),
            ));
        }

        bincode::serialize(input)
            .map(Witness::new)
            .map_err(|e| BackendError::SerializationError(e.to_string()))
    }

    fn prove(&self, witness: &Witness) -> Result<Vec<u8>, BackendError> {
        let input: SolvencyInput = bincode::deserialize(witness.as_bytes())
            .map_err(|e| BackendError::SerializationError(e.to_string()))?;

        let receipt = default_prover()
            .prove(Self::env(&input)?, &self.elf)
            .map_err(|e| BackendError::GenerationFailed(e.to_string()))?
            .receipt;

        bincode::serialize(&receipt).map_err(|e| BackendError::SerializationError(e.to_string()))
    }

    fn verify(&self, proof: &[u8], public_inputs: &PublicInputs) -> Result<bool, BackendError> {
        let receipt: Receipt = bincode::deserialize(proof)
            .map_err(|e| BackendError::SerializationError(e.to_string()))?;

        if let Err(e) = receipt.verify(self.image_id) {
            debug!(error = %e, "Receipt failed verification");
            return Ok(false);
        }

        let journal: SolvencyJournal = receipt
            .journal
            .decode()
            .map_err(|e| BackendError::VerificationFailed(e.to_string()))?;

        Ok(journal.threshold == public_inputs.threshold
            && journal.is_solvent == public_inputs.is_solvent)
    }
}
