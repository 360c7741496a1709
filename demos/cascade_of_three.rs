//! Default cascade example.
//!
//! A business owes a supplier 100 with only 50 in hand. The supplier owes
//! its bank 100 and has nothing but what the business pays it, so the
//! shortfall travels one hop per round.

use cascade_clearing::prelude::*;

fn main() -> Result<(), ClearingError> {
    println!("╔══════════════════════════════════════════════╗");
    println!("║  cascade-clearing: Cascade of Three          ║");
    println!("╚══════════════════════════════════════════════╝\n");

    let business = NodeId::new(0);
    let supplier = NodeId::new(1);
    let bank = NodeId::new(2);
    let sink = NodeId::new(3);

    let mut builder = LiabilityGraphBuilder::new(4, sink)?;
    builder.add_liability(business, supplier, 100.0)?;
    builder.add_liability(supplier, bank, 100.0)?;
    builder.add_resources(business, 50.0)?;
    let graph = builder.build();

    let engine = ClearingEngine::new(ClearingConfig::default())?;
    let mut state = engine.prepare(&graph, None)?;

    println!("Round-by-round ratios (business, supplier, bank):");
    loop {
        let summary = engine.step(&mut state);
        let r = state.ratios();
        println!(
            "  round {}: {:.2} {:.2} {:.2}  (+{} defaulted)",
            summary.round, r[0], r[1], r[2], summary.newly_defaulted
        );
        if summary.converged {
            break;
        }
    }

    let response = engine.clear(&ClearingRequest::new(1, graph.clone()))?;
    println!("\nDefault order:");
    for (name, node) in [("business", business), ("supplier", supplier), ("bank", bank)] {
        match response.status(node) {
            DefaultStatus::Defaulted { round } => println!("  {} defaulted in round {}", name, round),
            _ => println!("  {} stayed solvent", name),
        }
    }
    Ok(())
}
