//! Extraction and advice prompt templates.

use crate::document::DocumentType;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a tax document analysis expert. \
Extract structured data from tax forms with high accuracy and provide confidence scores \
for each field.";

pub const ADVICE_SYSTEM_PROMPT: &str = "You are a certified tax advisor with expertise in \
tax planning, deductions, and compliance. Provide accurate, helpful tax advice based on the \
provided form data.";

const RESPONSE_FORMAT: &str = "For each field, return an object with \"value\" and \
\"confidence\" (a number between 0 and 1). If a field cannot be found, use \"Not found\" as \
the value and 0.0 as the confidence.\n\n\
Return ONLY a JSON object in this format, with no other text:\n\
{\"field_name\": {\"value\": \"extracted value\", \"confidence\": 0.95}}";

const W2_FIELDS: &str = "Extract the following information from this W-2 form:\n\
- employer_name: Employer name\n\
- employer_ein: Employer identification number (EIN)\n\
- employee_name: Employee name\n\
- employee_ssn: Employee social security number\n\
- wages: Wages, tips, other compensation (Box 1)\n\
- federal_tax_withheld: Federal income tax withheld (Box 2)\n\
- social_security_wages: Social security wages (Box 3)\n\
- social_security_tax: Social security tax withheld (Box 4)\n\
- medicare_wages: Medicare wages and tips (Box 5)\n\
- medicare_tax: Medicare tax withheld (Box 6)\n\
- state: State and employer state ID\n\
- state_wages: State wages\n\
- state_tax: State income tax\n\
- local_wages: Local wages\n\
- local_tax: Local income tax";

const FORM_1099_FIELDS: &str = "Extract the following information from this 1099 form:\n\
- payer_name: Payer name\n\
- payer_tin: Payer taxpayer identification number\n\
- recipient_name: Recipient name\n\
- recipient_tin: Recipient taxpayer identification number\n\
- nonemployee_compensation: Non-employee compensation\n\
- federal_tax_withheld: Federal income tax withheld\n\
- state: State and payer state number\n\
- state_income: State income\n\
- state_tax_withheld: State tax withheld";

const FORM_1040_FIELDS: &str = "Extract the following information from this 1040 form:\n\
- taxpayer_name: Taxpayer name\n\
- taxpayer_ssn: Taxpayer social security number\n\
- filing_status: Filing status\n\
- dependents: Dependents claimed\n\
- total_income: Total income, with the main income sources\n\
- adjusted_gross_income: Adjusted gross income\n\
- deductions: Standard or itemized deductions\n\
- credits: Tax credits claimed\n\
- total_tax: Total tax liability\n\
- refund_or_amount_owed: Refund or amount owed";

const OTHER_FIELDS: &str = "Extract all relevant tax information from this document:\n\
- names and identification numbers of every party\n\
- monetary amounts, each as its own field\n\
- dates (tax year, payment dates)\n\
- any other tax-relevant fields";

const DEFAULT_ADVICE_INSTRUCTION: &str = "Based on the provided tax form data, give \
comprehensive tax advice.\n\n\
Return ONLY a JSON object with these keys:\n\
{\n\
  \"summary\": \"Brief summary of the tax situation\",\n\
  \"key_insights\": [\"insight\"],\n\
  \"recommendations\": [\"recommendation\"],\n\
  \"potential_deductions\": [\"deduction\"],\n\
  \"business_expenses\": [\"expense\"],\n\
  \"quarterly_estimates\": [\"estimate\"],\n\
  \"next_steps\": [\"step\"],\n\
  \"estimated_tax_impact\": \"Estimated effect on tax owed or refunded\",\n\
  \"disclaimer\": \"Standard tax advice disclaimer\"\n\
}\n\n\
Focus on actionable advice and potential tax savings.";

fn default_template(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::W2 => W2_FIELDS,
        DocumentType::Form1099 => FORM_1099_FIELDS,
        DocumentType::Form1040 => FORM_1040_FIELDS,
        DocumentType::Other => OTHER_FIELDS,
    }
}

/// Picks the extraction instruction. A non-blank custom instruction wins
/// unconditionally; otherwise the per-type template is used.
pub fn select_instruction(document_type: DocumentType, custom: Option<&str>) -> String {
    match custom.filter(|c| !c.trim().is_empty()) {
        Some(custom) => custom.to_string(),
        None => format!("{}\n\n{}", default_template(document_type), RESPONSE_FORMAT),
    }
}

pub fn advice_instruction(custom: Option<&str>) -> String {
    match custom.filter(|c| !c.trim().is_empty()) {
        Some(custom) => custom.to_string(),
        None => DEFAULT_ADVICE_INSTRUCTION.to_string(),
    }
}

pub fn extraction_system_prompt(document_type: DocumentType) -> String {
    format!("{} The document is a {} form.", EXTRACTION_SYSTEM_PROMPT, document_type)
}

pub fn build_extraction_prompt(instruction: &str, document_text: &str) -> String {
    format!(
        "{}\n\nDocument text:\n{}",
        instruction,
        sanitize_for_prompt(document_text)
    )
}

pub fn build_advice_prompt(instruction: &str, data_json: &str) -> String {
    format!(
        "{}\n\nTax form data:\n{}",
        instruction,
        sanitize_for_prompt(data_json)
    )
}

/// Escapes chat-template control tokens so document content cannot open or
/// close a message turn.
///
/// Covers ChatML `<|...|>` markers, `<s>`/`</s>`, `[INST]`/`[/INST]` and
/// `<<SYS>>`/`<</SYS>>`.
pub fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("<s>", "< s >")
        .replace("</s>", "< / s >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
        .replace("<<SYS>>", "< < SYS > >")
        .replace("<</SYS>>", "< < / SYS > >")
}
