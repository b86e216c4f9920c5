//! Reference transactions used by the live tool and the tests

use crate::types::RawTransaction;

/// Components of a historically fraudulent transaction, `V1`..`V28`.
const FRAUD_COMPONENTS: [f64; 28] = [
    -2.312227, 1.951992, -1.609851, 3.997906, -0.522188, -1.426545, -2.537387, 1.391657,
    -2.770089, -2.772272, 3.202033, -2.899907, -0.595222, -4.289254, 0.389724, -1.140747,
    -2.830056, -0.016822, 0.416956, 0.126911, 0.517232, -0.035049, -0.465211, 0.320198,
    0.044519, 0.177840, 0.261145, -0.143276,
];

/// An ordinary card payment.
pub fn normal_transaction() -> RawTransaction {
    RawTransaction::new(500.0, 1200.0)
        .with_component(1, 1.5)
        .with_component(2, -0.8)
        .with_component(3, 0.3)
}

/// A zero-amount transaction with a known fraudulent component signature.
pub fn fraud_transaction() -> RawTransaction {
    let mut tx = RawTransaction::new(406.0, 0.0);
    tx.components = FRAUD_COMPONENTS;
    tx
}
