//! Quick benchmark to verify VarString resolution performance

use ssm_ctl::document::DocumentCompiler;
use ssm_ctl::prompt::ScriptedPrompter;
use ssm_ctl::store::{LocalCipher, MemoryStore};
use ssm_ctl::{SsmClient, VarString};
use std::time::Instant;

fn main() {
    let client = SsmClient::new(Box::new(MemoryStore::new()), Box::new(LocalCipher::new()));

    // One parameter per template so every reference gets registered
    let templates = vec![
        "Simple text with no references",
        "/app/$(Env)/host",
        "$(Env)-$(Service).$(Region).internal",
        "arn:aws:kms:$(Region):$(Account):alias/$(Service)",
        "$(Env)/$(Service)/$(Env)/$(Service)/$(Region)/$(Account) mixed content",
    ];
    let document: String = templates
        .iter()
        .enumerate()
        .map(|(i, t)| format!("/bench/{}: \"{}\"\n", i, t))
        .collect();

    let mut unit = DocumentCompiler::default()
        .parse_str(&format!(".INPUT:\n  Env: String\n  Service: String\n{}", document))
        .expect("bench document parses");
    unit.supply_input("Env", "prod", false).expect("Env");
    unit.supply_input("Service", "billing", false).expect("Service");
    let resolved = unit
        .register()
        .resolve(&mut ScriptedPrompter::default(), false, None)
        .expect("bench inputs resolve");
    let ctx = resolved.context(&client);

    println!("VarString Resolution Performance Test");
    println!("=====================================\n");

    for template in &templates {
        let var = VarString::new(*template);
        let _ = var.resolve(&ctx);

        let iterations = 100_000;
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = var.resolve(&ctx);
        }
        let elapsed = start.elapsed();

        println!("Template: {:60}", format!("\"{}\"", template));
        println!("  Time for {} iterations: {:?}", iterations, elapsed);
        println!("  Per operation: {:?}\n", elapsed / iterations);
    }

    println!("Tokenizing vs resolving");
    println!("=======================\n");

    let iterations = 100_000;
    let template = templates[4];

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = VarString::new(template);
    }
    let parse_elapsed = start.elapsed();

    let var = VarString::new(template);
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = var.resolve(&ctx);
    }
    let resolve_elapsed = start.elapsed();

    println!("  Tokenize: {:?} per op", parse_elapsed / iterations);
    println!("  Resolve:  {:?} per op", resolve_elapsed / iterations);
}
