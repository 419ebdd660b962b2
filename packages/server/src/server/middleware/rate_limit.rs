// Rate limiting middleware using tower-governor
//
// Configuration:
// - StartJob: 2 requests per second per IP with burst of 5 (each job fans out
//   to the places provider and the LLM, so creation is the expensive call)
// - SSE subscriptions: 5 per second per IP with burst of 10
// - Disabled in development where all requests share localhost IP
//
// Applied in app.rs as layers on the discovery routes
