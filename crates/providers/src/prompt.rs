//! Prompt assembly: what the model sees on every loop iteration.
//!
//! Order: system instructions (with the schema), prior chat history, the
//! user's question, then this invocation's scratchpad.

use talk2sql_core::message::Message;
use talk2sql_core::provider::ProposalRequest;

/// System instructions for the SQL assistant.
pub fn system_prompt(schema_context: &str) -> String {
    format!(
        "You are an expert SQL query generator assistant. \
         Given the following database schema: \
         {schema_context} \
         and a user query in natural language, \
         WRITE a valid SQL query (SQLite dialect) to answer the user's question. \
         Once you generate a valid SQL query, use one of the tools provided to execute the query. \
         The output of the query execution will be provided back to you in the 'scratchpad' below. \
         If you have a valid answer in the scratchpad, you MUST use the final_answer tool \
         to provide the final answer back to the user. \
         In case the generated SQL query does not return a valid answer, an error message will be \
         provided back to you in the scratchpad. Use that error message to refine your query \
         and rerun the refined query using one of the tools provided."
    )
}

/// Everything after the system message, in order.
pub fn conversation(request: &ProposalRequest) -> Vec<Message> {
    let mut messages = Vec::with_capacity(request.history.len() + 1 + request.scratchpad.len() * 2);
    messages.extend(request.history.iter().cloned());
    messages.push(Message::human(&request.user_input));
    for entry in &request.scratchpad {
        messages.extend(entry.to_messages());
    }
    messages
}
